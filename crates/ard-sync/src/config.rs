use serde::{Deserialize, Serialize};

/// How framebuffers are cached.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FramebufferStrategy {
    /// Imageless when the backend supports it, concrete otherwise.
    #[default]
    Auto,
    /// Framebuffers only describe attachment structure. Views are supplied when a render pass
    /// begins.
    Imageless,
    /// Framebuffers are bound to specific views and evicted when any of them is destroyed.
    Concrete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCreateInfo {
    /// Used to name the submission thread and command buffers.
    pub debug_name: Option<String>,
    /// Submit batches from a dedicated thread instead of the thread calling `flush`.
    pub threaded_submit: bool,
    /// Completed batches beyond this count are destroyed instead of being kept for reuse.
    pub max_free_batches: usize,
    pub framebuffer_strategy: FramebufferStrategy,
}

impl Default for ContextCreateInfo {
    fn default() -> Self {
        Self {
            debug_name: None,
            threaded_submit: false,
            max_free_batches: 8,
            framebuffer_strategy: FramebufferStrategy::Auto,
        }
    }
}
