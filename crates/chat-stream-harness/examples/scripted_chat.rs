use std::sync::Arc;
use std::time::Duration;

use chat_stream_harness::observability::init_observability;
use chat_stream_harness::prelude::*;
use chat_stream_harness::testing::{ScriptedTransport, StaticAccessResolver, ready_settings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    init_observability();

    let words = "Streaming replies arrive in small pieces and are coalesced before display.";
    let mut particles: Vec<Particle> = words
        .split_inclusive(' ')
        .map(Particle::text)
        .collect();
    particles.push(Particle::end(TokenStopReason::Ok));

    let harness = Harness::builder()
        .access_resolver(Arc::new(StaticAccessResolver::new().with_model(
            "demo",
            "scripted",
            ready_settings("scripted-1"),
        )))
        .transport(Arc::new(
            ScriptedTransport::new()
                .with_particles(particles)
                .with_item_delay(Duration::from_millis(30)),
        ))
        .config(HarnessConfig::from_env()?)
        .build()?;

    let mut run = harness
        .chat_run("demo")
        .message(ChatMessage::system("Reply in one sentence."))
        .message(ChatMessage::user("How does streaming work?"))
        .start_stream()?;

    while let Some((update, is_final)) = run.next_update().await {
        let marker = if is_final { "final" } else { "partial" };
        println!("[{marker}] {}", update.text());
    }

    let outcome = run.finish().await?;
    println!("outcome: {:?}", outcome.status);
    Ok(())
}
