use std::{
    collections::HashMap,
    ops::Range,
    sync::{Arc, Mutex},
};

use tracing::debug;

use crate::engine::error::{ConvError, Result};

use super::{
    memory_tracker::MemoryTracker,
    scratch_registry::{ScratchKey, ScratchRegistry},
};

/// Backing memory for one execution. Never shared between concurrent executions;
/// the grantor hands out each region at most once.
pub struct Scratchpad {
    buffer: Vec<f32>,
    regions: Vec<(ScratchKey, Range<usize>)>,
    reserved_bytes: u64,
    tracker: Option<Arc<Mutex<MemoryTracker>>>,
}

impl Scratchpad {
    pub fn new(registry: &ScratchRegistry) -> Result<Self> {
        Self::allocate(registry, None)
    }

    /// Reserves the registry's size against `tracker` before allocating, and gives it
    /// back when dropped.
    pub fn new_tracked(
        registry: &ScratchRegistry,
        tracker: Arc<Mutex<MemoryTracker>>,
    ) -> Result<Self> {
        Self::allocate(registry, Some(tracker))
    }

    fn allocate(
        registry: &ScratchRegistry,
        tracker: Option<Arc<Mutex<MemoryTracker>>>,
    ) -> Result<Self> {
        let words = registry.len_in_words();
        let reserved_bytes = registry.size_in_bytes() as u64;

        if let Some(tracker) = &tracker {
            tracker
                .lock()
                .map_err(|_| ConvError::RuntimeError("Scratch memory tracker poisoned".into()))?
                .allocate(reserved_bytes)?;
        }

        let mut buffer = Vec::new();
        if let Err(err) = buffer.try_reserve_exact(words) {
            // Give the reservation back, nothing was allocated
            if let Some(tracker) = &tracker {
                if let Ok(mut tracker) = tracker.lock() {
                    tracker.deallocate(reserved_bytes);
                }
            }
            return Err(err.into());
        }
        buffer.resize(words, 0.0);

        debug!(bytes = reserved_bytes, regions = registry.entries().len(), "allocated scratchpad");

        Ok(Self {
            buffer,
            regions: registry.layout(),
            reserved_bytes,
            tracker,
        })
    }

    pub fn size_in_bytes(&self) -> usize {
        self.buffer.len() * std::mem::size_of::<f32>()
    }

    pub fn grantor(&mut self) -> ScratchGrantor<'_> {
        ScratchGrantor::from_regions(&mut self.buffer, &self.regions)
    }
}

impl Drop for Scratchpad {
    fn drop(&mut self) {
        if let Some(tracker) = &self.tracker {
            if let Ok(mut tracker) = tracker.lock() {
                tracker.deallocate(self.reserved_bytes);
            }
        }
    }
}

/// Hands out the disjoint regions of a scratchpad by key. A region can be taken once;
/// nested grantors carve out everything a sub-primitive owns.
pub struct ScratchGrantor<'a> {
    regions: HashMap<ScratchKey, &'a mut [f32]>,
}

impl<'a> ScratchGrantor<'a> {
    pub fn empty() -> Self {
        Self {
            regions: HashMap::new(),
        }
    }

    fn from_regions(buffer: &'a mut [f32], layout: &[(ScratchKey, Range<usize>)]) -> Self {
        let mut regions = HashMap::with_capacity(layout.len());
        let mut rest: &'a mut [f32] = buffer;
        let mut cursor = 0;

        // Layout ranges are ascending and disjoint
        for (key, range) in layout {
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(range.start - cursor);
            let (region, tail) = tail.split_at_mut(range.len());
            rest = tail;
            cursor = range.end;
            regions.insert(key.clone(), region);
        }

        Self { regions }
    }

    pub fn take(&mut self, name: &'static str) -> Result<&'a mut [f32]> {
        self.regions
            .remove(&ScratchKey::new(name))
            .ok_or_else(|| {
                ConvError::RuntimeError(format!("Scratch buffer {} was not granted", name))
            })
    }

    pub fn nested(&mut self, owner: &'static str) -> ScratchGrantor<'a> {
        let owned: Vec<ScratchKey> = self
            .regions
            .keys()
            .filter(|key| key.strip_owner(owner).is_some())
            .cloned()
            .collect();

        let mut regions = HashMap::with_capacity(owned.len());
        for key in owned {
            if let (Some(region), Some(stripped)) = (self.regions.remove(&key), key.strip_owner(owner)) {
                regions.insert(stripped, region);
            }
        }

        ScratchGrantor { regions }
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
