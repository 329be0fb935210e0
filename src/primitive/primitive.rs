use std::sync::Arc;

use crate::{
    compute::scratch_registry::ScratchRegistry,
    engine::{engine::Engine, error::Result},
    tensor::tensor_desc::TensorDesc,
};

use super::exec_ctx::ExecContext;

/// A planned computation: every descriptor resolved and every scratch buffer booked.
/// Immutable once built, so it can be shared and turned into primitives many times.
pub trait PrimitiveDesc: Send + Sync {
    // Implementation name, used in logs
    fn name(&self) -> String;

    fn src_desc(&self) -> &TensorDesc;

    fn weights_desc(&self) -> Option<&TensorDesc> {
        None
    }

    fn bias_desc(&self) -> Option<&TensorDesc> {
        None
    }

    fn dst_desc(&self) -> &TensorDesc;

    // Temporary buffers one execution needs, nested requirements included
    fn scratch_registry(&self) -> &ScratchRegistry;

    fn create_primitive(&self, engine: &dyn Engine) -> Result<Arc<dyn Primitive>>;
}

/// A created, executable computation. Executions never mutate the primitive, so one
/// primitive may run on many threads at once as long as every execution brings its
/// own buffers and scratch grant.
pub trait Primitive: Send + Sync {
    fn name(&self) -> String;

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<()>;
}
