use std::sync::{Arc, Mutex};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::{
    compute::{
        memory_tracker::MemoryTracker, scratch_registry::ScratchRegistry, scratchpad::Scratchpad,
    },
    conv::{conv_desc::ConvolutionDesc, ncsp_convolution::NcspConvolutionDesc},
    cpu::{
        reference_convolution::ReferenceConvolutionDesc, reference_matmul::ReferenceMatmulDesc,
        reorder::ReorderDesc,
    },
    primitive::{attributes::PrimitiveAttr, primitive::PrimitiveDesc},
    tensor::tensor_desc::TensorDesc,
};

use super::{
    config::EngineConfig,
    engine::{enumerate_convolution_impls, ConvolutionImpl, Engine},
    error::{ConvError, Result},
};

// Enumeration order, first accepting implementation wins
static CONVOLUTION_IMPLS: [ConvolutionImpl; 2] =
    [NcspConvolutionDesc::create, ReferenceConvolutionDesc::create];

pub struct CpuEngine {
    config: EngineConfig,
    pool: Arc<ThreadPool>,
    scratch_tracker: Arc<Mutex<MemoryTracker>>,
}

impl CpuEngine {
    pub fn new() -> Result<Self> {
        Self::new_with(EngineConfig::default())
    }

    pub fn new_with(config: EngineConfig) -> Result<Self> {
        let config = config.build()?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|idx| format!("ncsp-cpu-{}", idx))
            .build()?;

        let tracker = match config.scratch_limit_bytes {
            Some(limit) => MemoryTracker::new(limit),
            None => MemoryTracker::unlimited(),
        };

        debug!(
            threads = config.threads,
            scratch_limit = ?config.scratch_limit_bytes,
            "cpu engine ready"
        );

        Ok(Self {
            config,
            pool: Arc::new(pool),
            scratch_tracker: Arc::new(Mutex::new(tracker)),
        })
    }

    fn with_tracker<T>(&self, f: impl FnOnce(&MemoryTracker) -> T) -> Result<T> {
        self.scratch_tracker
            .lock()
            .map(|tracker| f(&tracker))
            .map_err(|_| ConvError::RuntimeError("Scratch memory tracker poisoned".to_string()))
    }

    /// Bytes currently held by live scratchpads of this engine.
    pub fn scratch_in_use(&self) -> Result<u64> {
        self.with_tracker(MemoryTracker::get_current)
    }

    /// Most scratch bytes ever held at once.
    pub fn scratch_peak(&self) -> Result<u64> {
        self.with_tracker(MemoryTracker::get_peak)
    }
}

impl Engine for CpuEngine {
    fn name(&self) -> String {
        format!("cpu({} threads)", self.config.threads)
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn thread_pool(&self) -> Arc<ThreadPool> {
        self.pool.clone()
    }

    fn convolution_impls(&self) -> &[ConvolutionImpl] {
        &CONVOLUTION_IMPLS
    }

    fn convolution_desc(
        &self,
        desc: &ConvolutionDesc,
        attr: &PrimitiveAttr,
    ) -> Result<Box<dyn PrimitiveDesc>> {
        enumerate_convolution_impls(self, desc, attr)
    }

    fn matmul_desc(
        &self,
        src: &TensorDesc,
        weights: &TensorDesc,
        bias: Option<&TensorDesc>,
        dst: &TensorDesc,
        attr: &PrimitiveAttr,
    ) -> Result<Box<dyn PrimitiveDesc>> {
        Ok(Box::new(ReferenceMatmulDesc::new(
            src, weights, bias, dst, attr,
        )?))
    }

    fn reorder_desc(&self, src: &TensorDesc, dst: &TensorDesc) -> Result<Box<dyn PrimitiveDesc>> {
        Ok(Box::new(ReorderDesc::new(src, dst)?))
    }

    fn scratchpad(&self, registry: &ScratchRegistry) -> Result<Scratchpad> {
        Scratchpad::new_tracked(registry, self.scratch_tracker.clone())
    }
}
