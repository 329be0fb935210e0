use super::error::{ConvError, Result};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    // Worker threads of the engine's compute pool
    pub threads: usize,
    // Byte budget shared by every scratchpad the engine hands out, None for unlimited
    pub scratch_limit_bytes: Option<u64>,
    // The most optimal value depends on each machine. Below it kernels stay on the calling thread
    pub parallel_threshold: usize,
}

impl EngineConfig {
    pub fn build(self) -> Result<Self> {
        if self.threads == 0 {
            return Err(ConvError::InvalidArguments(
                "Engine needs at least one compute thread".to_string(),
            ));
        }

        Ok(self)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            scratch_limit_bytes: None,
            parallel_threshold: 4096,
        }
    }
}
