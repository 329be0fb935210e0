pub mod memory_tracker;
pub mod scratch_registry;
pub mod scratchpad;
