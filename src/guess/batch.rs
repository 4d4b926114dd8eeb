/// Adaptive batch sizing used by the sync engine.
///
/// The size only shrinks while the engine searches for the chain head and is
/// restored to the configured default once backfill is done.
#[derive(Debug, Clone)]
pub struct BatchSizer {
    default_size: u64,
    current_size: u64,
}

impl BatchSizer {
    pub fn new(default_size: u64) -> Self {
        let default_size = default_size.max(1);
        Self {
            default_size,
            current_size: default_size,
        }
    }

    pub fn get_size(&self) -> u64 {
        self.current_size
    }

    pub fn default_size(&self) -> u64 {
        self.default_size
    }

    /// Halves the batch (floor). Returns `false` when the size was already 1
    /// and could not shrink any further.
    pub fn shrink_on_failure(&mut self) -> bool {
        if self.current_size <= 1 {
            return false;
        }
        self.current_size = (self.current_size / 2).max(1);
        true
    }

    pub fn reset(&mut self) {
        self.current_size = self.default_size;
    }
}
