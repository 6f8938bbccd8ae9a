use async_trait::async_trait;

/// Seam to the downstream generation pipeline.
///
/// The pipeline runs after admission, outside the gate's responsibility.
/// Dispatch happens on a spawned task: a failing or slow pipeline cannot
/// undo admission, payment recording, or the caller's response — partial
/// failure is the pipeline's to report on its own channel.
#[async_trait]
pub trait GenerationPipeline: Send + Sync {
    async fn dispatch(&self, session_id: String);
}

/// Default implementation: records the handoff and nothing else.
pub struct LogOnlyPipeline;

#[async_trait]
impl GenerationPipeline for LogOnlyPipeline {
    async fn dispatch(&self, session_id: String) {
        tracing::info!(session_id = %session_id, "full session ready for generation");
    }
}
