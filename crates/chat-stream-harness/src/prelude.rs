//! Common imports for typical harness usage.
pub use crate::{
    AbortHandle, ChatMessage, ChatRunBuilder, ContentFragment, FragmentPart, Harness,
    HarnessBuilder, HarnessConfig, HarnessError, MessageUpdate, ModelSettings, Particle,
    RunOutcome, RunStatus, RunStream, StreamingContext, TokenStopReason, TransportError,
};
