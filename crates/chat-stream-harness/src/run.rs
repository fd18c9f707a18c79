use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument as _, info, info_span, warn};

use crate::abort::AbortHandle;
use crate::content::{ChatMessage, ContentFragment, fragments_text, sync_fragments};
use crate::errors::HarnessError;
use crate::generate::{GenerateArgs, GenerationAccumulator};
use crate::generator::{Generator, TokenStopReason};
use crate::harness::HarnessInner;
use crate::stream_call::StreamTermination;
use crate::throttle::{Snapshot, ThrottledDelivery};
use crate::transport::StreamingContext;

/// Caller-facing snapshot of the message being generated.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageUpdate {
    pub fragments: Vec<ContentFragment>,
    pub generator: Generator,
    /// `true` for every update except the final one.
    pub pending_incomplete: bool,
}

impl MessageUpdate {
    fn new(generator: Generator) -> Self {
        Self {
            fragments: Vec::new(),
            generator,
            pending_incomplete: true,
        }
    }

    /// Concatenates the visible text fragments in order.
    pub fn text(&self) -> String {
        fragments_text(&self.fragments)
    }

    /// Message of the last error fragment, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.fragments.iter().rev().find_map(ContentFragment::error_message)
    }

    fn absorb(&mut self, accumulator: &GenerationAccumulator, is_done: bool) {
        sync_fragments(&mut self.fragments, &accumulator.fragments);
        self.generator.clone_from(&accumulator.generator);
        self.pending_incomplete = !is_done;
    }
}

impl Snapshot for MessageUpdate {
    fn snapshot(&self) -> Self {
        self.clone()
    }

    fn refresh_from(&mut self, latest: &Self) {
        sync_fragments(&mut self.fragments, &latest.fragments);
        self.generator.clone_from(&latest.generator);
        self.pending_incomplete = latest.pending_incomplete;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Aborted,
    Errored,
}

/// Classification of a finished run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub error_message: Option<String>,
}

impl RunOutcome {
    fn success() -> Self {
        Self {
            status: RunStatus::Success,
            error_message: None,
        }
    }

    fn aborted() -> Self {
        Self {
            status: RunStatus::Aborted,
            error_message: None,
        }
    }

    fn errored(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Errored,
            error_message: Some(message.into()),
        }
    }
}

/// Builder for configuring and starting a single chat run.
///
/// Obtained from `Harness::chat_run`. Defaults for the throttle level,
/// streaming flag and context name come from the harness `HarnessConfig`.
pub struct ChatRunBuilder {
    inner: Arc<HarnessInner>,
    model_id: String,
    history: Vec<ChatMessage>,
    context: Option<StreamingContext>,
    throttle_level: u32,
    streaming: bool,
    abort: AbortHandle,
}

impl ChatRunBuilder {
    pub(crate) fn new(inner: Arc<HarnessInner>, model_id: String) -> Self {
        let throttle_level = inner.config.default_throttle_level;
        let streaming = inner.config.default_streaming;
        Self {
            inner,
            model_id,
            history: Vec::new(),
            context: None,
            throttle_level,
            streaming,
            abort: AbortHandle::new(),
        }
    }

    /// Replaces the chat history.
    pub fn history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// Appends one message to the chat history.
    pub fn message(mut self, message: ChatMessage) -> Self {
        self.history.push(message);
        self
    }

    /// Sets the streaming context; by default a fresh reference is generated
    /// under the configured context name.
    pub fn context(mut self, context: StreamingContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Sets the update throttle level (0 delivers every update).
    pub fn throttle_level(mut self, level: u32) -> Self {
        self.throttle_level = level;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Uses an externally owned abort handle for this run.
    pub fn abort_with(mut self, handle: AbortHandle) -> Self {
        self.abort = handle;
        self
    }

    /// Returns a handle that cancels this run.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Runs to completion, delivering throttled snapshots to `on_update`.
    ///
    /// `on_update` receives `(update, is_final)`. Every run ends with exactly
    /// one final delivery whose `pending_incomplete` is `false`, whatever the
    /// outcome.
    ///
    /// When throttled, coalesced updates are delivered from a timer task, so
    /// `on_update` may run on another task than the one awaiting `run`. Calls
    /// never overlap and arrive in order. Keep `on_update` short: it runs
    /// while the throttle state is locked.
    pub async fn run<F>(self, on_update: F) -> RunOutcome
    where
        F: FnMut(&MessageUpdate, bool) + Send + 'static,
    {
        let ChatRunBuilder {
            inner,
            model_id,
            history,
            context,
            throttle_level,
            streaming,
            abort,
        } = self;
        let context = context.unwrap_or_else(|| {
            StreamingContext::chat_stream(
                inner.config.default_context_name.clone(),
                uuid::Uuid::new_v4().to_string(),
            )
        });
        let span = info_span!("chat_run", model = %model_id, context = %context.name, throttle_level);

        async move {
            let mut on_update = on_update;
            let mut delivery = ThrottledDelivery::new(throttle_level, move |update: &MessageUpdate| {
                on_update(update, !update.pending_incomplete)
            });
            let mut message = MessageUpdate::new(Generator::named(&model_id));

            let generated = match inner.request_builder.build(&history) {
                Ok(request) => {
                    let args = GenerateArgs {
                        model_id,
                        request,
                        context,
                        streaming,
                        abort: abort.signal(),
                    };
                    crate::generate::generate_content(&inner, args, |accumulator, is_done| {
                        message.absorb(accumulator, is_done);
                        if !is_done {
                            delivery.decimate(&message);
                        }
                    })
                    .await
                }
                Err(err) => Err(err),
            };

            let outcome = match generated {
                Err(err) => {
                    let presented = err.to_string();
                    warn!(error = %presented, "generation failed before streaming");
                    message.fragments.push(ContentFragment::error(presented.clone()));
                    message.generator.token_stop_reason = Some(TokenStopReason::Issue);
                    RunOutcome::errored(presented)
                }
                Ok(result) => classify(&result.termination, &message),
            };

            message.pending_incomplete = false;
            info!(status = ?outcome.status, fragments = message.fragments.len(), "chat run finished");
            delivery.finalize(&message);
            outcome
        }
        .instrument(span)
        .await
    }

    /// Spawns the run and returns a handle yielding owned snapshots.
    ///
    /// Requires a tokio runtime.
    pub fn start_stream(self) -> Result<RunStream, HarnessError> {
        if self.model_id.trim().is_empty() {
            return Err(HarnessError::Validation("model id must not be empty".into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| HarnessError::Config("start_stream requires a tokio runtime".into()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let abort_handle = self.abort_handle();
        let model_id = self.model_id.clone();
        runtime.spawn(async move {
            let outcome = self
                .run(move |update, is_final| {
                    let _ = tx.send((update.clone(), is_final));
                })
                .await;
            let _ = outcome_tx.send(outcome);
        });

        Ok(RunStream {
            model_id,
            rx,
            outcome_rx,
            abort_handle,
            saw_final: false,
        })
    }
}

fn classify(termination: &StreamTermination, message: &MessageUpdate) -> RunOutcome {
    match termination {
        StreamTermination::Completed
            if message.generator.token_stop_reason == Some(TokenStopReason::Issue) =>
        {
            RunOutcome::errored(
                message
                    .last_error()
                    .unwrap_or("the stream reported an issue"),
            )
        }
        StreamTermination::Completed => RunOutcome::success(),
        StreamTermination::UserAborted => RunOutcome::aborted(),
        StreamTermination::Failed { message } | StreamTermination::AbortMismatch { message } => {
            RunOutcome::errored(message.clone())
        }
    }
}

/// Streaming handle returned by `ChatRunBuilder::start_stream`.
///
/// Use `next_update()` to consume snapshots as they arrive and `finish()` to
/// obtain the outcome after the final snapshot.
pub struct RunStream {
    model_id: String,
    rx: mpsc::UnboundedReceiver<(MessageUpdate, bool)>,
    outcome_rx: oneshot::Receiver<RunOutcome>,
    abort_handle: AbortHandle,
    saw_final: bool,
}

impl RunStream {
    /// Returns a handle that can cancel the run.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for the next snapshot and whether it is the final one.
    ///
    /// Returns `None` after the final snapshot has been consumed.
    pub async fn next_update(&mut self) -> Option<(MessageUpdate, bool)> {
        if self.saw_final {
            return None;
        }
        let update = self.rx.recv().await;
        if matches!(update, Some((_, true))) {
            self.saw_final = true;
        }
        update
    }

    /// Drains remaining snapshots and returns the run outcome.
    pub async fn finish(mut self) -> Result<RunOutcome, HarnessError> {
        while self.next_update().await.is_some() {}
        self.outcome_rx.await.map_err(|_| {
            HarnessError::protocol_msg(format!(
                "run task ended without an outcome (model={})",
                self.model_id
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::FragmentPart;
    use crate::errors::TransportError;
    use crate::harness::Harness;
    use crate::model::ModelSettings;
    use crate::particle::Particle;
    use crate::testing::{ScriptedTransport, StaticAccessResolver, StreamScript, ready_settings};
    use std::sync::Mutex;

    fn harness_with(transport: Arc<ScriptedTransport>, settings: ModelSettings) -> Harness {
        Harness::builder()
            .access_resolver(Arc::new(
                StaticAccessResolver::new().with_model("model-a", "openai", settings),
            ))
            .transport(transport)
            .build()
            .expect("build harness")
    }

    fn recorder() -> (
        Arc<Mutex<Vec<(MessageUpdate, bool)>>>,
        impl FnMut(&MessageUpdate, bool) + Send + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |update: &MessageUpdate, is_final: bool| {
                seen.lock().expect("lock").push((update.clone(), is_final));
            }
        };
        (seen, sink)
    }

    #[tokio::test]
    async fn unthrottled_run_delivers_each_particle_then_final() {
        let transport = Arc::new(ScriptedTransport::new().with_particles(vec![
            Particle::text("Hel"),
            Particle::text("lo"),
            Particle::end(TokenStopReason::Ok),
        ]));
        let harness = harness_with(Arc::clone(&transport), ready_settings("gpt-x"));
        let (seen, sink) = recorder();

        let outcome = harness
            .chat_run("model-a")
            .message(ChatMessage::user("hi"))
            .throttle_level(0)
            .run(sink)
            .await;

        assert_eq!(outcome, RunOutcome::success());
        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 4);
        let (last, is_final) = seen.last().expect("final update");
        assert!(is_final);
        assert!(!last.pending_incomplete);
        assert_eq!(last.text(), "Hello");
        assert!(seen[..3].iter().all(|(u, f)| u.pending_incomplete && !f));
        assert_eq!(seen[0].0.text(), "Hel");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn default_context_uses_configured_name() {
        let transport = Arc::new(ScriptedTransport::new());
        let harness = harness_with(Arc::clone(&transport), ready_settings("gpt-x"));
        harness
            .chat_run("model-a")
            .message(ChatMessage::user("hi"))
            .run(|_, _| {})
            .await;
        let calls = transport.recorded_calls();
        assert_eq!(calls[0].context.name, "conversation");
        assert!(!calls[0].context.reference.is_empty());
        assert!(calls[0].streaming);
    }

    #[tokio::test]
    async fn configuration_error_yields_single_error_update() {
        let transport = Arc::new(ScriptedTransport::new());
        let harness = harness_with(Arc::clone(&transport), ModelSettings::new("gpt-x"));
        let (seen, sink) = recorder();

        let outcome = harness
            .chat_run("model-a")
            .message(ChatMessage::user("hi"))
            .run(sink)
            .await;

        assert_eq!(outcome.status, RunStatus::Errored);
        assert!(outcome.error_message.as_deref().is_some_and(|m| m.contains("temperature")));
        assert_eq!(transport.call_count(), 0);
        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        let (update, is_final) = &seen[0];
        assert!(is_final);
        assert!(update.last_error().is_some_and(|m| m.contains("temperature")));
        assert_eq!(
            update.generator.token_stop_reason,
            Some(TokenStopReason::Issue)
        );
    }

    #[tokio::test]
    async fn empty_history_is_a_request_error() {
        let transport = Arc::new(ScriptedTransport::new());
        let harness = harness_with(Arc::clone(&transport), ready_settings("gpt-x"));
        let outcome = harness.chat_run("model-a").run(|_, _| {}).await;
        assert_eq!(outcome.status, RunStatus::Errored);
        assert!(outcome.error_message.as_deref().is_some_and(|m| m.starts_with("request error")));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn issue_particle_classifies_as_errored() {
        let transport = Arc::new(ScriptedTransport::new().with_particles(vec![
            Particle::text("partial"),
            Particle::Issue {
                message: "content filtered upstream".into(),
            },
        ]));
        let harness = harness_with(transport, ready_settings("gpt-x"));
        let (seen, sink) = recorder();
        let outcome = harness
            .chat_run("model-a")
            .message(ChatMessage::user("hi"))
            .throttle_level(0)
            .run(sink)
            .await;

        assert_eq!(
            outcome,
            RunOutcome::errored("content filtered upstream".to_string())
        );
        let seen = seen.lock().expect("lock");
        let (last, _) = seen.last().expect("final update");
        assert_eq!(last.text(), "partial");
        assert!(matches!(
            last.fragments.last().map(|f| &f.part),
            Some(FragmentPart::Error { .. })
        ));
    }

    #[tokio::test]
    async fn transport_failure_is_errored_with_presented_message() {
        let transport = Arc::new(ScriptedTransport::new().with_script(StreamScript::Items(vec![
            Ok(Particle::text("a")),
            Err(TransportError::transport("openai", "boom", Some(500))),
        ])));
        let harness = harness_with(transport, ready_settings("gpt-x"));
        let (seen, sink) = recorder();
        let outcome = harness
            .chat_run("model-a")
            .message(ChatMessage::user("hi"))
            .run(sink)
            .await;

        assert_eq!(outcome.status, RunStatus::Errored);
        let message = outcome.error_message.expect("message");
        assert!(message.contains("boom"));
        let seen = seen.lock().expect("lock");
        let (last, is_final) = seen.last().expect("final update");
        assert!(is_final);
        assert_eq!(last.last_error(), Some(message.as_str()));
    }

    #[tokio::test]
    async fn streamed_run_yields_snapshots_and_outcome() {
        let transport = Arc::new(ScriptedTransport::new().with_particles(vec![
            Particle::text("a"),
            Particle::text("b"),
        ]));
        let harness = harness_with(transport, ready_settings("gpt-x"));
        let mut stream = harness
            .chat_run("model-a")
            .message(ChatMessage::user("hi"))
            .throttle_level(0)
            .start_stream()
            .expect("start");

        let mut updates = Vec::new();
        while let Some(update) = stream.next_update().await {
            updates.push(update);
        }
        assert_eq!(updates.len(), 3);
        assert!(updates.last().is_some_and(|(u, f)| *f && u.text() == "ab"));
        assert_eq!(stream.finish().await.expect("finish"), RunOutcome::success());
    }

    #[tokio::test]
    async fn aborting_a_streamed_run_keeps_partial_output() {
        let transport = Arc::new(ScriptedTransport::new().with_script(
            StreamScript::ItemsThenHang(vec![Ok(Particle::text("so far"))]),
        ));
        let harness = harness_with(transport, ready_settings("gpt-x"));
        let mut stream = harness
            .chat_run("model-a")
            .message(ChatMessage::user("hi"))
            .throttle_level(0)
            .start_stream()
            .expect("start");

        let (first, is_final) = stream.next_update().await.expect("first update");
        assert!(!is_final);
        assert_eq!(first.text(), "so far");
        stream.abort_handle().abort();

        let (last, is_final) = stream.next_update().await.expect("final update");
        assert!(is_final);
        assert_eq!(last.text(), "so far");
        assert!(last.last_error().is_none());
        assert_eq!(
            last.generator.token_stop_reason,
            Some(TokenStopReason::ClientAbort)
        );
        assert_eq!(stream.finish().await.expect("finish"), RunOutcome::aborted());
    }

    #[test]
    fn start_stream_requires_a_runtime() {
        let harness = harness_with(Arc::new(ScriptedTransport::new()), ready_settings("gpt-x"));
        let result = harness.chat_run("model-a").start_stream();
        assert!(matches!(result, Err(HarnessError::Config(msg)) if msg.contains("runtime")));
    }

    #[tokio::test]
    async fn start_stream_rejects_empty_model_id() {
        let harness = harness_with(Arc::new(ScriptedTransport::new()), ready_settings("gpt-x"));
        let result = harness.chat_run("  ").start_stream();
        assert!(matches!(result, Err(HarnessError::Validation(_))));
    }
}
