use crate::error::{EngineError, Stage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative abort flag, observed at chunk boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn check(&self, stage: Stage, offset: u64) -> Result<(), EngineError> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled { stage, offset })
        } else {
            Ok(())
        }
    }
}
