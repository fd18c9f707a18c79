//! Mid-level generation: access resolution, rate limiting and metrics
//! around one streaming call.

use tracing::{Instrument as _, debug, info_span};

use crate::abort::AbortSignal;
use crate::content::{ContentFragment, fragments_text, sync_fragments};
use crate::errors::HarnessError;
use crate::generator::Generator;
use crate::harness::HarnessInner;
use crate::metrics::MetricsRecord;
use crate::model::ModelParams;
use crate::reassembler::StreamAccumulator;
use crate::request::GenerateRequest;
use crate::stream_call::{StreamTermination, stream_particles};
use crate::transport::{StreamingContext, TransportCall};

/// Mid-level accumulator, seeded with the resolved vendor and model.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationAccumulator {
    pub fragments: Vec<ContentFragment>,
    pub generator: Generator,
}

impl GenerationAccumulator {
    pub fn new(generator: Generator) -> Self {
        Self {
            fragments: Vec::new(),
            generator,
        }
    }

    /// Concatenates the visible text fragments in order.
    pub fn text(&self) -> String {
        fragments_text(&self.fragments)
    }

    fn absorb(&mut self, stream_state: &StreamAccumulator) {
        sync_fragments(&mut self.fragments, &stream_state.fragments);
        self.generator.merge_from(&stream_state.generator);
    }
}

/// Arguments of one mid-level generation.
#[derive(Clone, Debug)]
pub struct GenerateArgs {
    pub model_id: String,
    pub request: GenerateRequest,
    pub context: StreamingContext,
    pub streaming: bool,
    pub abort: AbortSignal,
}

/// Result of a generation whose stream was opened (or attempted).
#[derive(Clone, Debug)]
pub struct GenerationResult {
    pub run_id: uuid::Uuid,
    pub accumulator: GenerationAccumulator,
    pub termination: StreamTermination,
}

/// Resolves access, waits for the vendor rate limit, streams, and records
/// metrics.
///
/// Configuration and resolution problems are returned as errors before any
/// transport call. Once the stream is attempted the result is always `Ok`;
/// stream failures are described by the termination and by the fragments.
pub(crate) async fn generate_content<F>(
    inner: &HarnessInner,
    args: GenerateArgs,
    mut on_update: F,
) -> Result<GenerationResult, HarnessError>
where
    F: FnMut(&GenerationAccumulator, bool),
{
    let GenerateArgs {
        model_id,
        request,
        context,
        streaming,
        abort,
    } = args;
    let run_id = uuid::Uuid::new_v4();
    let span = info_span!("generate", run_id = %run_id, model = %model_id, context = %context.name);

    async move {
        if model_id.trim().is_empty() {
            return Err(HarnessError::Validation("model id must not be empty".into()));
        }
        let resolved = inner.access_resolver.resolve(&model_id).await?;
        let params = ModelParams::from_settings(&model_id, &resolved.settings)?;

        if let Some(limiter) = &resolved.vendor.rate_limiter {
            let mut waiting = abort.clone();
            tokio::select! {
                _ = limiter.acquire(&model_id, &resolved.settings) => {}
                _ = waiting.aborted() => debug!("aborted while waiting for the vendor rate limit"),
            }
        }

        let mut accumulator =
            GenerationAccumulator::new(Generator::aix(resolved.vendor.id.clone(), model_id.clone()));
        let call = TransportCall {
            run_id,
            access: resolved.access,
            model: params,
            request,
            context: context.clone(),
            streaming,
            abort,
        };

        let outcome = stream_particles(
            inner.transport.as_ref(),
            inner.presenter.as_ref(),
            call,
            |stream_state, is_done| {
                accumulator.absorb(stream_state);
                on_update(&accumulator, is_done);
            },
        )
        .await;

        inner.metrics_sink.record(MetricsRecord {
            run_id,
            vendor_id: resolved.vendor.id,
            model_id,
            context_name: context.name,
            metrics: accumulator.generator.metrics.clone(),
            pricing: resolved.settings.pricing,
            stop_reason: accumulator.generator.token_stop_reason,
        });

        Ok(GenerationResult {
            run_id,
            accumulator,
            termination: outcome.termination,
        })
    }
    .instrument(span)
    .await
}
