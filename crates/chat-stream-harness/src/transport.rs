use std::pin::Pin;

use crate::abort::AbortSignal;
use crate::access::VendorAccess;
use crate::errors::TransportError;
use crate::model::ModelParams;
use crate::particle::Particle;
use crate::request::GenerateRequest;

/// Ordered, finite, single-consumption sequence of particles.
pub type ParticleStream =
    Pin<Box<dyn futures::Stream<Item = Result<Particle, TransportError>> + Send + 'static>>;

/// Kind of operation a stream is opened for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ContextMethod {
    #[serde(rename = "chat-stream")]
    ChatStream,
}

/// Identifies what a stream is generating for (logs and metrics).
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamingContext {
    pub method: ContextMethod,
    /// Context name, for example `conversation`.
    pub name: String,
    /// Reference of the object being generated (for example a message id).
    #[serde(rename = "ref")]
    pub reference: String,
}

impl StreamingContext {
    pub fn chat_stream(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            method: ContextMethod::ChatStream,
            name: name.into(),
            reference: reference.into(),
        }
    }
}

/// Everything a transport needs to open one generation stream.
#[derive(Clone, Debug)]
pub struct TransportCall {
    pub run_id: uuid::Uuid,
    pub access: VendorAccess,
    pub model: ModelParams,
    pub request: GenerateRequest,
    pub context: StreamingContext,
    /// When false the transport may deliver the whole answer as one burst.
    pub streaming: bool,
    /// Raised when the caller cancels; transports should stop and yield
    /// `TransportError::Cancelled`.
    pub abort: AbortSignal,
}

/// Opens remote generation streams.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open_stream(&self, call: TransportCall) -> Result<ParticleStream, TransportError>;
}
