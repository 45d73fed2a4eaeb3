use std::sync::atomic::{AtomicU64, Ordering};

pub type RenderGeneration = u64;

/// State shared by every render of one session.
#[derive(Debug, Default)]
pub struct RenderContext {
    last_generation: AtomicU64,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new render generation. Generations start at 1.
    pub fn next_generation(&self) -> RenderGeneration {
        self.last_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current_generation(&self) -> RenderGeneration {
        self.last_generation.load(Ordering::Relaxed)
    }
}
