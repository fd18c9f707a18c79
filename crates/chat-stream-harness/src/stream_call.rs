//! Low-level streaming call: consumes one remote particle stream.

use futures::StreamExt as _;
use tracing::{debug, info, warn};

use crate::errors::{ErrorPresenter, TransportError};
use crate::generator::Generator;
use crate::reassembler::{StreamAccumulator, StreamReassembler};
use crate::transport::{StreamTransport, TransportCall};

/// How a particle stream ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamTermination {
    /// The stream ran out of particles.
    Completed,
    /// The caller cancelled the run.
    UserAborted,
    /// The transport failed; `message` is the presented error.
    Failed { message: String },
    /// Cancellation was requested but the transport reported a failure
    /// rather than a cancellation.
    AbortMismatch { message: String },
}

/// Final state of one streaming call.
#[derive(Clone, Debug)]
pub struct StreamOutcome {
    pub accumulator: StreamAccumulator,
    pub termination: StreamTermination,
}

/// Opens one stream through `transport` and reassembles its particles.
///
/// `on_update` sees the accumulator after every particle with `is_done =
/// false`, then exactly once more with the finalized accumulator and
/// `is_done = true`. The abort signal in `call` is checked before opening
/// the stream and raced against every particle.
pub async fn stream_particles<F>(
    transport: &dyn StreamTransport,
    presenter: &dyn ErrorPresenter,
    call: TransportCall,
    mut on_update: F,
) -> StreamOutcome
where
    F: FnMut(&StreamAccumulator, bool),
{
    let run_id = call.run_id;
    let mut abort = call.abort.clone();
    let mut reassembler =
        StreamReassembler::new(StreamAccumulator::new(Generator::named(&call.model.id)));

    let termination = if abort.is_aborted() {
        debug!(run_id = %run_id, "run aborted before the stream was opened");
        reassembler.reassemble_except_user_abort();
        StreamTermination::UserAborted
    } else {
        match transport.open_stream(call).await {
            Err(err) => classify_failure(&mut reassembler, abort.is_aborted(), &err, presenter),
            Ok(mut particles) => loop {
                if abort.is_aborted() {
                    reassembler.reassemble_except_user_abort();
                    break StreamTermination::UserAborted;
                }
                tokio::select! {
                    biased;
                    _ = abort.aborted() => {
                        reassembler.reassemble_except_user_abort();
                        break StreamTermination::UserAborted;
                    }
                    next = particles.next() => match next {
                        Some(Ok(particle)) => {
                            debug!(run_id = %run_id, particle = particle.label(), "particle");
                            reassembler.reassemble_particle(particle);
                            on_update(reassembler.accumulator(), false);
                        }
                        Some(Err(err)) => {
                            break classify_failure(&mut reassembler, abort.is_aborted(), &err, presenter);
                        }
                        None => break StreamTermination::Completed,
                    }
                }
            },
        }
    };

    let particles = reassembler.particle_count();
    let accumulator = reassembler.reassemble_finalize();
    info!(run_id = %run_id, particles, termination = ?termination, "stream finished");
    on_update(&accumulator, true);
    StreamOutcome {
        accumulator,
        termination,
    }
}

fn classify_failure(
    reassembler: &mut StreamReassembler,
    user_abort_signaled: bool,
    error: &TransportError,
    presenter: &dyn ErrorPresenter,
) -> StreamTermination {
    match (user_abort_signaled, error.is_cancelled()) {
        (_, true) => {
            reassembler.reassemble_except_user_abort();
            StreamTermination::UserAborted
        }
        (false, false) => {
            let message = presenter.present(error);
            reassembler.reassemble_except_error(message.clone());
            StreamTermination::Failed { message }
        }
        (true, false) => {
            let message = format!(
                "Stream interrupted: cancellation was requested, but the transport reported a failure instead: {}",
                presenter.present(error)
            );
            warn!(error = %error, "abort signal and transport error disagree");
            reassembler.reassemble_except_error(message.clone());
            StreamTermination::AbortMismatch { message }
        }
    }
}
