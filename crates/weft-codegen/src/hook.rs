use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A caller-owned cell naming a callable entry point.
///
/// The engine stores addresses into it with release ordering: first the
/// transitional value supplied at release time (typically an interpreter
/// fallback), then the chunk's own address once its bytes are
/// executable. Readers must load with acquire ordering before jumping
/// through the value; the pairing guarantees they observe every byte of
/// the chunk.
pub struct Hook(AtomicUsize);

impl Hook {
    pub const fn new(entry: usize) -> Self {
        Hook(AtomicUsize::new(entry))
    }

    /// Current entry point.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, addr: usize) {
        self.0.store(addr, Ordering::Release);
    }
}

/// A deferred hook installation. Once the page bytes below `end` become
/// executable, `hook` receives the address of the chunk at `start`.
pub(crate) struct JitStage {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) hook: Arc<Hook>,
}
