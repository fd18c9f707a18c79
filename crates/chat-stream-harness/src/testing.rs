//! Test doubles for the harness collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;

use crate::access::{AccessResolver, ResolvedAccess, VendorAccess, VendorRateLimiter, VendorRoute};
use crate::errors::{HarnessError, TransportError};
use crate::model::ModelSettings;
use crate::particle::Particle;
use crate::transport::{ParticleStream, StreamTransport, TransportCall};

/// What one `open_stream` call of a `ScriptedTransport` does.
#[derive(Clone, Debug)]
pub enum StreamScript {
    /// Yield these items, then end.
    Items(Vec<Result<Particle, TransportError>>),
    /// Yield these items, then wait for the abort signal and yield
    /// `TransportError::Cancelled`.
    ItemsThenHang(Vec<Result<Particle, TransportError>>),
    /// Fail to open the stream.
    OpenError(TransportError),
}

/// Transport that replays queued scripts in order.
///
/// Once the queue is empty every call opens an empty stream.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<StreamScript>>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<TransportCall>>,
    item_delay: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a stream yielding `particles` and ending normally.
    pub fn with_particles(self, particles: Vec<Particle>) -> Self {
        self.with_script(StreamScript::Items(
            particles.into_iter().map(Ok).collect(),
        ))
    }

    pub fn with_script(self, script: StreamScript) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(script);
        self
    }

    /// Delays every yielded item (use with paused tokio time).
    pub fn with_item_delay(self, delay: Duration) -> Self {
        *self
            .item_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
        self
    }

    /// Number of `open_stream` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls received so far.
    pub fn recorded_calls(&self) -> Vec<TransportCall> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open_stream(&self, call: TransportCall) -> Result<ParticleStream, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut abort = call.abort.clone();
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(StreamScript::Items(Vec::new()));
        let delay = *self
            .item_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let items: ParticleStream = match script {
            StreamScript::OpenError(err) => return Err(err),
            StreamScript::Items(items) => Box::pin(stream::iter(items)),
            StreamScript::ItemsThenHang(items) => {
                let hang = stream::once(async move {
                    abort.aborted().await;
                    Err(TransportError::Cancelled)
                });
                Box::pin(stream::iter(items).chain(hang))
            }
        };
        Ok(match delay {
            Some(delay) => Box::pin(items.then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            })),
            None => items,
        })
    }
}

/// Access resolver backed by a fixed table of models.
#[derive(Default)]
pub struct StaticAccessResolver {
    models: HashMap<String, ResolvedAccess>,
    resolves: AtomicUsize,
}

impl StaticAccessResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `model_id` under `vendor` with the given settings.
    pub fn with_model(
        mut self,
        model_id: impl Into<String>,
        vendor: impl Into<crate::model::VendorId>,
        settings: ModelSettings,
    ) -> Self {
        self.models.insert(
            model_id.into(),
            ResolvedAccess {
                access: VendorAccess::default(),
                settings,
                vendor: VendorRoute::new(vendor),
            },
        );
        self
    }

    /// Attaches a rate limiter to an already registered model.
    pub fn with_rate_limiter(
        mut self,
        model_id: &str,
        limiter: Arc<dyn VendorRateLimiter>,
    ) -> Self {
        if let Some(resolved) = self.models.get_mut(model_id) {
            resolved.vendor.rate_limiter = Some(limiter);
        }
        self
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AccessResolver for StaticAccessResolver {
    async fn resolve(&self, model_id: &str) -> Result<ResolvedAccess, HarnessError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.models
            .get(model_id)
            .cloned()
            .ok_or_else(|| HarnessError::Access(format!("unknown model: {model_id}")))
    }
}

/// Settings that pass validation: a model reference and a temperature.
pub fn ready_settings(model_ref: &str) -> ModelSettings {
    ModelSettings::new(model_ref).temperature(0.5)
}
