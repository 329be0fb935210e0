use std::sync::Arc;

use rayon::ThreadPool;
use tracing::debug;

use crate::{
    compute::{scratch_registry::ScratchRegistry, scratchpad::Scratchpad},
    conv::conv_desc::ConvolutionDesc,
    primitive::{attributes::PrimitiveAttr, primitive::PrimitiveDesc},
    tensor::tensor_desc::TensorDesc,
};

use super::{
    config::EngineConfig,
    error::{ConvError, Result},
};

/// Constructor of one convolution implementation. Returns `Unimplemented` when the
/// implementation does not accept the request, which moves enumeration on to the next.
pub type ConvolutionImpl =
    fn(&ConvolutionDesc, &PrimitiveAttr, &dyn Engine) -> Result<Box<dyn PrimitiveDesc>>;

/// Everything plan building and execution needs from the outside world: primitive
/// factories, the compute pool and scratch allocation.
pub trait Engine: Send + Sync {
    fn name(&self) -> String;

    fn config(&self) -> &EngineConfig;

    fn thread_pool(&self) -> Arc<ThreadPool>;

    // Candidate implementations, best first
    fn convolution_impls(&self) -> &[ConvolutionImpl];

    fn convolution_desc(
        &self,
        desc: &ConvolutionDesc,
        attr: &PrimitiveAttr,
    ) -> Result<Box<dyn PrimitiveDesc>>;

    fn matmul_desc(
        &self,
        src: &TensorDesc,
        weights: &TensorDesc,
        bias: Option<&TensorDesc>,
        dst: &TensorDesc,
        attr: &PrimitiveAttr,
    ) -> Result<Box<dyn PrimitiveDesc>>;

    fn reorder_desc(&self, src: &TensorDesc, dst: &TensorDesc) -> Result<Box<dyn PrimitiveDesc>>;

    fn scratchpad(&self, registry: &ScratchRegistry) -> Result<Scratchpad>;
}

/// Walks `engine.convolution_impls()` and returns the first implementation that accepts
/// the request. Any error other than `Unimplemented` stops the walk.
pub fn enumerate_convolution_impls(
    engine: &dyn Engine,
    desc: &ConvolutionDesc,
    attr: &PrimitiveAttr,
) -> Result<Box<dyn PrimitiveDesc>> {
    for create in engine.convolution_impls() {
        match create(desc, attr, engine) {
            Ok(pd) => {
                debug!(implementation = %pd.name(), src = %desc.src_desc(), "convolution implementation selected");
                return Ok(pd);
            }
            Err(ConvError::Unimplemented(reason)) => {
                debug!(%reason, "convolution implementation declined");
            }
            Err(err) => return Err(err),
        }
    }

    Err(ConvError::Unimplemented(format!(
        "No convolution implementation on {} accepts src {} dst {}",
        engine.name(),
        desc.src_desc(),
        desc.dst_desc()
    )))
}
