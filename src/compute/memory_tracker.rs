use tracing::trace;

use crate::engine::error::{ConvError, Result};

// Byte counts throughout. One tracker is shared by every scratchpad an engine hands out

pub struct MemoryTracker {
    maximum: u64,
    current: u64,
    // High-water mark of current
    peak: u64,
}

impl MemoryTracker {
    pub fn new(maximum: u64) -> Self {
        Self {
            maximum,
            current: 0,
            peak: 0,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    /// Reserves `size` bytes. A failed reservation leaves the tracker unchanged.
    pub fn allocate(&mut self, size: u64) -> Result<()> {
        let Some(new_usage) = self.current.checked_add(size) else {
            return Err(ConvError::OutOfMemory(format!(
                "Scratch reservation would overflow: current {} + size {}",
                self.current, size
            )));
        };
        if new_usage > self.maximum {
            return Err(ConvError::OutOfMemory(format!(
                "Scratch budget exceeded: tried to reserve {} bytes with {} of {} bytes available",
                size,
                self.get_available(),
                self.maximum
            )));
        }

        self.current = new_usage;
        self.peak = self.peak.max(new_usage);
        trace!(reserved = size, in_use = self.current, "scratch reserved");
        Ok(())
    }

    pub fn deallocate(&mut self, size: u64) {
        self.current = self.current.saturating_sub(size);
    }

    pub fn get_current(&self) -> u64 {
        self.current
    }

    pub fn get_peak(&self) -> u64 {
        self.peak
    }

    fn get_available(&self) -> u64 {
        self.maximum - self.current
    }
}
