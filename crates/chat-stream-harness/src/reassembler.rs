//! Particle reassembly into ordered content fragments and generator metadata.

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::content::{ContentFragment, FragmentPart, fragments_text};
use crate::generator::{GenerationMetrics, Generator, TokenStopReason};
use crate::particle::Particle;

/// Low-level accumulator: the fragments and generator metadata built from
/// one particle stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamAccumulator {
    pub fragments: Vec<ContentFragment>,
    pub generator: Generator,
}

impl StreamAccumulator {
    /// Creates an empty accumulator seeded with the target generator.
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
}

/// Applies particles to the accumulator it owns.
///
/// `reassemble_finalize` consumes the reassembler, so every stream is
/// finalized at most once and nothing touches the accumulator afterwards.
#[derive(Debug)]
pub struct StreamReassembler {
    accumulator: StreamAccumulator,
    started_at: Instant,
    saw_end: bool,
    particles: u64,
}

impl StreamReassembler {
    pub fn new(accumulator: StreamAccumulator) -> Self {
        Self {
            accumulator,
            started_at: Instant::now(),
            saw_end: false,
            particles: 0,
        }
    }

    /// Read-only view of the state merged so far.
    pub fn accumulator(&self) -> &StreamAccumulator {
        &self.accumulator
    }

    /// Number of particles applied so far.
    pub fn particle_count(&self) -> u64 {
        self.particles
    }

    /// Applies one particle.
    pub fn reassemble_particle(&mut self, particle: Particle) {
        if self.saw_end {
            debug!(particle = particle.label(), "particle received after end");
        }
        self.particles = self.particles.saturating_add(1);

        match particle {
            Particle::TextDelta { text } => {
                if !text.is_empty() {
                    self.append_or_extend(FragmentPart::Text { text });
                }
            }
            Particle::ReasoningDelta { text } => {
                if !text.is_empty() {
                    self.append_or_extend(FragmentPart::Reasoning { text });
                }
            }
            Particle::ToolCallStart { id, name } => {
                self.settle_open_fragment();
                self.accumulator
                    .fragments
                    .push(ContentFragment::streaming(FragmentPart::ToolCall {
                        id,
                        name,
                        args: String::new(),
                        parsed_args: None,
                    }));
            }
            Particle::ToolCallArgsDelta { args } => {
                let open_call = self
                    .accumulator
                    .fragments
                    .last_mut()
                    .filter(|f| f.in_progress);
                match open_call.map(|f| &mut f.part) {
                    Some(FragmentPart::ToolCall { args: buf, .. }) => buf.push_str(&args),
                    _ => warn!("tool call arguments without an open tool call; dropped"),
                }
            }
            Particle::SetModel { name } => {
                if !name.is_empty() {
                    self.accumulator.generator.name = name;
                }
            }
            Particle::SetMetrics { metrics } => {
                self.accumulator
                    .generator
                    .metrics
                    .get_or_insert_with(GenerationMetrics::default)
                    .merge(&metrics);
            }
            Particle::End { reason } => {
                self.saw_end = true;
                if reason.is_some() {
                    self.accumulator.generator.token_stop_reason = reason;
                }
            }
            Particle::Issue { message } => self.reassemble_except_error(message),
        }
    }

    /// Appends an error fragment and marks the stop reason as an issue.
    pub fn reassemble_except_error(&mut self, message: impl Into<String>) {
        self.settle_open_fragment();
        self.accumulator
            .fragments
            .push(ContentFragment::error(message));
        self.accumulator.generator.token_stop_reason = Some(TokenStopReason::Issue);
    }

    /// Marks the stream as cancelled by the caller; content is left as is.
    pub fn reassemble_except_user_abort(&mut self) {
        self.accumulator.generator.token_stop_reason = Some(TokenStopReason::ClientAbort);
    }

    /// Settles every fragment and derives terminal metrics.
    pub fn reassemble_finalize(mut self) -> StreamAccumulator {
        for fragment in &mut self.accumulator.fragments {
            settle(fragment);
        }

        let elapsed_ms = u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        let metrics = self
            .accumulator
            .generator
            .metrics
            .get_or_insert_with(GenerationMetrics::default);
        if metrics.dt_all_ms.is_none() {
            metrics.dt_all_ms = Some(elapsed_ms);
        }
        metrics.derive_output_rate();

        debug!(
            particles = self.particles,
            fragments = self.accumulator.fragments.len(),
            stop_reason = ?self.accumulator.generator.token_stop_reason,
            "stream reassembly finalized"
        );
        self.accumulator
    }

    fn append_or_extend(&mut self, part: FragmentPart) {
        if let Some(last) = self.accumulator.fragments.last_mut()
            && last.accepts(&part)
        {
            match (&mut last.part, part) {
                (FragmentPart::Text { text }, FragmentPart::Text { text: delta })
                | (FragmentPart::Reasoning { text }, FragmentPart::Reasoning { text: delta }) => {
                    text.push_str(&delta);
                }
                _ => {}
            }
            return;
        }
        self.settle_open_fragment();
        self.accumulator
            .fragments
            .push(ContentFragment::streaming(part));
    }

    fn settle_open_fragment(&mut self) {
        if let Some(last) = self.accumulator.fragments.last_mut() {
            settle(last);
        }
    }
}

fn settle(fragment: &mut ContentFragment) {
    if !fragment.in_progress {
        return;
    }
    fragment.in_progress = false;
    if let FragmentPart::ToolCall {
        args, parsed_args, ..
    } = &mut fragment.part
    {
        let raw = args.trim();
        *parsed_args = if raw.is_empty() {
            Some(serde_json::Value::Object(serde_json::Map::new()))
        } else {
            serde_json::from_str(raw).ok()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassembler() -> StreamReassembler {
        StreamReassembler::new(StreamAccumulator::new(Generator::named("model-a")))
    }

    #[test]
    fn text_deltas_extend_one_fragment() {
        let mut r = reassembler();
        r.reassemble_particle(Particle::text("Hel"));
        r.reassemble_particle(Particle::text("lo"));
        assert_eq!(r.accumulator().fragments.len(), 1);
        assert!(r.accumulator().fragments[0].in_progress);

        let acc = r.reassemble_finalize();
        assert_eq!(acc.text(), "Hello");
        assert!(!acc.fragments[0].in_progress);
    }

    #[test]
    fn kind_change_settles_and_appends() {
        let mut r = reassembler();
        r.reassemble_particle(Particle::reasoning("think"));
        r.reassemble_particle(Particle::text("answer"));
        r.reassemble_particle(Particle::reasoning("more"));

        let fragments = &r.accumulator().fragments;
        assert_eq!(fragments.len(), 3);
        assert!(!fragments[0].in_progress);
        assert!(!fragments[1].in_progress);
        assert!(fragments[2].in_progress);
        assert!(matches!(&fragments[1].part, FragmentPart::Text { text } if text == "answer"));
    }

    #[test]
    fn empty_deltas_are_ignored() {
        let mut r = reassembler();
        r.reassemble_particle(Particle::text(""));
        assert!(r.accumulator().fragments.is_empty());
        assert_eq!(r.particle_count(), 1);
    }

    #[test]
    fn tool_call_arguments_are_parsed_on_finalize() {
        let mut r = reassembler();
        r.reassemble_particle(Particle::tool_call("call_1", "get_weather"));
        r.reassemble_particle(Particle::tool_args(r#"{"city":"#));
        r.reassemble_particle(Particle::tool_args(r#""Oslo"}"#));
        let acc = r.reassemble_finalize();

        match &acc.fragments[0].part {
            FragmentPart::ToolCall {
                name, parsed_args, ..
            } => {
                assert_eq!(name, "get_weather");
                assert_eq!(parsed_args, &Some(serde_json::json!({"city": "Oslo"})));
            }
            other => panic!("unexpected fragment {other:?}"),
        }
    }

    #[test]
    fn invalid_tool_arguments_keep_raw_text() {
        let mut r = reassembler();
        r.reassemble_particle(Particle::tool_call("call_1", "f"));
        r.reassemble_particle(Particle::tool_args("{not json"));
        let acc = r.reassemble_finalize();
        assert!(matches!(
            &acc.fragments[0].part,
            FragmentPart::ToolCall { args, parsed_args: None, .. } if args == "{not json"
        ));
    }

    #[test]
    fn tool_arguments_without_open_call_are_dropped() {
        let mut r = reassembler();
        r.reassemble_particle(Particle::text("hi"));
        r.reassemble_particle(Particle::tool_args("{}"));
        assert_eq!(r.accumulator().fragments.len(), 1);
        assert_eq!(r.accumulator().text(), "hi");
    }

    #[test]
    fn generator_updates_merge() {
        let mut r = reassembler();
        r.reassemble_particle(Particle::SetModel {
            name: "model-a-0613".into(),
        });
        r.reassemble_particle(Particle::SetMetrics {
            metrics: GenerationMetrics {
                tokens_in: Some(12),
                ..GenerationMetrics::default()
            },
        });
        r.reassemble_particle(Particle::SetMetrics {
            metrics: GenerationMetrics {
                tokens_out: Some(40),
                dt_inner_ms: Some(2000),
                ..GenerationMetrics::default()
            },
        });
        r.reassemble_particle(Particle::end(TokenStopReason::OutOfTokens));
        let acc = r.reassemble_finalize();

        let metrics = acc.generator.metrics.expect("metrics");
        assert_eq!(acc.generator.name, "model-a-0613");
        assert_eq!(metrics.tokens_in, Some(12));
        assert_eq!(metrics.tokens_out, Some(40));
        assert_eq!(metrics.v_tout_inner, Some(20.0));
        assert_eq!(
            acc.generator.token_stop_reason,
            Some(TokenStopReason::OutOfTokens)
        );
    }

    #[test]
    fn particles_after_end_are_still_applied() {
        let mut r = reassembler();
        r.reassemble_particle(Particle::end(TokenStopReason::Ok));
        r.reassemble_particle(Particle::text("late"));
        let acc = r.reassemble_finalize();
        assert_eq!(acc.text(), "late");
        assert_eq!(acc.generator.token_stop_reason, Some(TokenStopReason::Ok));
    }

    #[test]
    fn issue_particle_appends_error_fragment() {
        let mut r = reassembler();
        r.reassemble_particle(Particle::text("partial"));
        r.reassemble_particle(Particle::Issue {
            message: "overloaded".into(),
        });
        let acc = r.reassemble_finalize();
        assert_eq!(acc.fragments.len(), 2);
        assert_eq!(acc.fragments[1].error_message(), Some("overloaded"));
        assert_eq!(acc.generator.token_stop_reason, Some(TokenStopReason::Issue));
    }

    #[test]
    fn except_error_settles_open_fragment() {
        let mut r = reassembler();
        r.reassemble_particle(Particle::text("partial"));
        r.reassemble_except_error("connection reset");
        let fragments = &r.accumulator().fragments;
        assert!(!fragments[0].in_progress);
        assert!(fragments[1].is_error());
    }

    #[test]
    fn user_abort_adds_no_fragment() {
        let mut r = reassembler();
        r.reassemble_particle(Particle::text("partial"));
        r.reassemble_except_user_abort();
        let acc = r.reassemble_finalize();
        assert_eq!(acc.fragments.len(), 1);
        assert!(!acc.fragments.iter().any(ContentFragment::is_error));
        assert_eq!(
            acc.generator.token_stop_reason,
            Some(TokenStopReason::ClientAbort)
        );
    }

    #[test]
    fn zero_particles_finalize_to_empty_content() {
        let acc = reassembler().reassemble_finalize();
        assert!(acc.fragments.is_empty());
        assert!(acc.generator.token_stop_reason.is_none());
        assert!(acc.generator.metrics.and_then(|m| m.dt_all_ms).is_some());
    }
}
