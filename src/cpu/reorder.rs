use std::sync::Arc;

use tracing::trace;

use crate::{
    compute::scratch_registry::ScratchRegistry,
    engine::{
        engine::Engine,
        error::{ConvError, Result},
    },
    primitive::{
        exec_ctx::{ArgKind, ExecContext},
        primitive::{Primitive, PrimitiveDesc},
    },
    tensor::tensor_desc::{OffsetMapper, TensorDesc},
};

use super::parallel::ParallelFill;

const BLOCK_LEN: usize = 1024;

/// Copies a tensor between two layouts of the same logical shape.
pub struct ReorderDesc {
    src: TensorDesc,
    dst: TensorDesc,
    registry: ScratchRegistry,
}

impl ReorderDesc {
    pub fn new(src: &TensorDesc, dst: &TensorDesc) -> Result<Self> {
        if src.is_any() || dst.is_any() {
            return Err(ConvError::Unimplemented(format!(
                "Reorder needs concrete layouts, got {} -> {}",
                src, dst
            )));
        }
        if src.dims() != dst.dims() || src.data_type() != dst.data_type() {
            return Err(ConvError::InvalidArguments(format!(
                "Reorder between {} and {} changes the tensor",
                src, dst
            )));
        }

        Ok(Self {
            src: src.clone(),
            dst: dst.clone(),
            registry: ScratchRegistry::new(),
        })
    }
}

impl PrimitiveDesc for ReorderDesc {
    fn name(&self) -> String {
        format!("reorder:{}->{}", self.src, self.dst)
    }

    fn src_desc(&self) -> &TensorDesc {
        &self.src
    }

    fn dst_desc(&self) -> &TensorDesc {
        &self.dst
    }

    fn scratch_registry(&self) -> &ScratchRegistry {
        &self.registry
    }

    fn create_primitive(&self, engine: &dyn Engine) -> Result<Arc<dyn Primitive>> {
        Ok(Arc::new(Reorder {
            name: self.name(),
            len: self.dst.num_elements(),
            // Walk dst memory in order, look each element up in src
            dst_to_src: self.dst.offset_mapper(&self.src)?,
            parallel: ParallelFill::new(engine),
        }))
    }
}

pub struct Reorder {
    name: String,
    len: usize,
    dst_to_src: OffsetMapper,
    parallel: ParallelFill,
}

impl Primitive for Reorder {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<()> {
        let src = ctx.input(ArgKind::Src)?;
        let dst = ctx.take_output(ArgKind::Dst)?;
        if src.len() != self.len || dst.len() != self.len {
            return Err(ConvError::InvalidArguments(format!(
                "{} expects {} elements, got src {} dst {}",
                self.name,
                self.len,
                src.len(),
                dst.len()
            )));
        }

        trace!(reorder = %self.name, elements = self.len, "executing reorder");

        self.parallel.fill(dst, BLOCK_LEN, |start, block| {
            for (i, value) in block.iter_mut().enumerate() {
                *value = src[self.dst_to_src.map(start + i)];
            }
        });

        Ok(())
    }
}
