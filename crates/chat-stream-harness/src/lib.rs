//! Streaming chat-generation harness with a builder-first async API.
//!
//! A run streams particles from a `StreamTransport`, reassembles them into
//! content fragments, and delivers throttled `MessageUpdate` snapshots to the
//! caller, ending with exactly one final update.
//!
//! # Builder-first usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chat_stream_harness::prelude::*;
//! use chat_stream_harness::testing::{ScriptedTransport, StaticAccessResolver, ready_settings};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), HarnessError> {
//! let transport = ScriptedTransport::new()
//!     .with_particles(vec![Particle::text("Hello"), Particle::end(TokenStopReason::Ok)]);
//! let harness = Harness::builder()
//!     .access_resolver(Arc::new(
//!         StaticAccessResolver::new().with_model("fast", "openai", ready_settings("gpt-5-nano")),
//!     ))
//!     .transport(Arc::new(transport))
//!     .build()?;
//!
//! let outcome = harness
//!     .chat_run("fast")
//!     .message(ChatMessage::system("Answer briefly."))
//!     .message(ChatMessage::user("Say hello"))
//!     .run(|update, is_final| {
//!         if is_final {
//!             println!("{}", update.text());
//!         }
//!     })
//!     .await;
//!
//! assert_eq!(outcome.status, RunStatus::Success);
//! # Ok(())
//! # }
//! ```

/// Cooperative cancellation handle and signal.
pub mod abort;
/// Vendor access resolution and rate limiting.
pub mod access;
/// Harness-wide defaults.
pub mod config;
/// Content fragments and chat messages.
pub mod content;
/// Public error types used by the harness API.
pub mod errors;
/// Mid-level generation with access, rate limiting and metrics.
pub mod generate;
/// Generator metadata, metrics and stop reasons.
pub mod generator;
/// Harness entry point and builder.
pub mod harness;
/// Per-run metrics records and sinks.
pub mod metrics;
/// Model identifiers and settings.
pub mod model;
/// Process-wide tracing setup.
pub mod observability;
/// Stream particles emitted by transports.
pub mod particle;
/// Common imports for typical usage.
pub mod prelude;
/// Particle-to-fragment reassembly.
pub mod reassembler;
/// Chat history to request payload.
pub mod request;
/// Chat run builder, outcome classification and streaming handle.
pub mod run;
/// Low-level streaming call.
pub mod stream_call;
/// Scripted collaborators for tests and demos.
pub mod testing;
/// Rate-limited delivery of updates.
pub mod throttle;
/// Transport contract for opening particle streams.
pub mod transport;

pub use abort::{AbortHandle, AbortSignal};
pub use access::{
    AccessResolver, IntervalRateLimiter, ResolvedAccess, VendorAccess, VendorRateLimiter,
    VendorRoute,
};
pub use config::HarnessConfig;
pub use content::{ChatMessage, ChatRole, ContentFragment, FragmentId, FragmentPart};
pub use errors::{ErrorPresenter, HarnessError, PlainErrorPresenter, TransportError};
pub use generate::{GenerateArgs, GenerationAccumulator, GenerationResult};
pub use generator::{GenerationMetrics, Generator, GeneratorKind, TokenStopReason};
pub use harness::{Harness, HarnessBuilder};
pub use metrics::{InMemoryMetricsSink, MetricsRecord, MetricsSink, TracingMetricsSink};
pub use model::{ModelParams, ModelPricing, ModelSettings, VendorId};
pub use particle::Particle;
pub use reassembler::{StreamAccumulator, StreamReassembler};
pub use request::{GenerateRequest, HistoryRequestBuilder, RequestBuilder};
pub use run::{ChatRunBuilder, MessageUpdate, RunOutcome, RunStatus, RunStream};
pub use stream_call::{StreamOutcome, StreamTermination, stream_particles};
pub use throttle::{Snapshot, ThrottledDelivery};
pub use transport::{ParticleStream, StreamTransport, StreamingContext, TransportCall};
