use std::sync::Arc;

use crate::access::AccessResolver;
use crate::config::HarnessConfig;
use crate::errors::{ErrorPresenter, HarnessError, PlainErrorPresenter};
use crate::generate::{GenerateArgs, GenerationAccumulator, GenerationResult};
use crate::metrics::{MetricsSink, TracingMetricsSink};
use crate::request::{HistoryRequestBuilder, RequestBuilder};
use crate::run::ChatRunBuilder;
use crate::transport::StreamTransport;

pub(crate) struct HarnessInner {
    pub(crate) access_resolver: Arc<dyn AccessResolver>,
    pub(crate) request_builder: Arc<dyn RequestBuilder>,
    pub(crate) transport: Arc<dyn StreamTransport>,
    pub(crate) metrics_sink: Arc<dyn MetricsSink>,
    pub(crate) presenter: Arc<dyn ErrorPresenter>,
    pub(crate) config: HarnessConfig,
}

/// Entry point for running chat generations.
#[derive(Clone)]
pub struct Harness {
    pub(crate) inner: Arc<HarnessInner>,
}

impl Harness {
    /// Starts a builder for wiring collaborators and creating a `Harness`.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Starts a chat run against `model_id`.
    pub fn chat_run(&self, model_id: impl Into<String>) -> ChatRunBuilder {
        ChatRunBuilder::new(Arc::clone(&self.inner), model_id.into())
    }

    /// Runs one mid-level generation without throttling or outcome
    /// classification.
    ///
    /// `on_update` receives the accumulator after every particle and once
    /// more with `is_done = true`.
    pub async fn generate_content<F>(
        &self,
        args: GenerateArgs,
        on_update: F,
    ) -> Result<GenerationResult, HarnessError>
    where
        F: FnMut(&GenerationAccumulator, bool),
    {
        crate::generate::generate_content(&self.inner, args, on_update).await
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.inner.config
    }
}

/// Builder used to register collaborators before creating a `Harness`.
#[derive(Default)]
pub struct HarnessBuilder {
    access_resolver: Option<Arc<dyn AccessResolver>>,
    request_builder: Option<Arc<dyn RequestBuilder>>,
    transport: Option<Arc<dyn StreamTransport>>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
    presenter: Option<Arc<dyn ErrorPresenter>>,
    config: Option<HarnessConfig>,
}

impl HarnessBuilder {
    /// Sets the resolver mapping model ids to vendor access (required).
    pub fn access_resolver(mut self, resolver: Arc<dyn AccessResolver>) -> Self {
        self.access_resolver = Some(resolver);
        self
    }

    /// Sets the request builder (defaults to `HistoryRequestBuilder`).
    pub fn request_builder(mut self, builder: Arc<dyn RequestBuilder>) -> Self {
        self.request_builder = Some(builder);
        self
    }

    /// Sets the transport opening particle streams (required).
    pub fn transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the metrics sink (defaults to `TracingMetricsSink`).
    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    /// Sets the error presenter (defaults to `PlainErrorPresenter`).
    pub fn presenter(mut self, presenter: Arc<dyn ErrorPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn config(mut self, config: HarnessConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the harness and validates that required collaborators are set.
    pub fn build(self) -> Result<Harness, HarnessError> {
        let access_resolver = self
            .access_resolver
            .ok_or_else(|| HarnessError::Config("no access resolver registered".into()))?;
        let transport = self
            .transport
            .ok_or_else(|| HarnessError::Config("no stream transport registered".into()))?;
        Ok(Harness {
            inner: Arc::new(HarnessInner {
                access_resolver,
                request_builder: self
                    .request_builder
                    .unwrap_or_else(|| Arc::new(HistoryRequestBuilder)),
                transport,
                metrics_sink: self
                    .metrics_sink
                    .unwrap_or_else(|| Arc::new(TracingMetricsSink)),
                presenter: self
                    .presenter
                    .unwrap_or_else(|| Arc::new(PlainErrorPresenter)),
                config: self.config.unwrap_or_default(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, StaticAccessResolver};

    #[test]
    fn build_requires_resolver_and_transport() {
        let result = Harness::builder()
            .transport(Arc::new(ScriptedTransport::new()))
            .build();
        assert!(
            matches!(result, Err(HarnessError::Config(message)) if message.contains("access resolver"))
        );

        let result = Harness::builder()
            .access_resolver(Arc::new(StaticAccessResolver::new()))
            .build();
        assert!(
            matches!(result, Err(HarnessError::Config(message)) if message.contains("transport"))
        );
    }

    #[test]
    fn build_applies_default_config() {
        let harness = Harness::builder()
            .access_resolver(Arc::new(StaticAccessResolver::new()))
            .transport(Arc::new(ScriptedTransport::new()))
            .config(HarnessConfig::default().throttle_level(3))
            .build()
            .expect("harness");
        assert_eq!(harness.config().default_throttle_level, 3);
        assert!(harness.config().default_streaming);
    }
}
