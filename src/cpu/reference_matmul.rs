use std::sync::Arc;

use tracing::trace;

use crate::{
    compute::scratch_registry::ScratchRegistry,
    engine::{
        engine::Engine,
        error::{ConvError, Result},
    },
    primitive::{
        attributes::PrimitiveAttr,
        exec_ctx::{ArgKind, ExecContext},
        primitive::{Primitive, PrimitiveDesc},
    },
    tensor::{layout::Layout, tensor_desc::TensorDesc},
};

use super::parallel::ParallelFill;

pub const KEY_MATMUL_PACKED_WEIGHTS: &str = "packed_weights";

/// Batched `dst{.., M, N} = src{.., M, K} × weights{.., K, N}` over dense row-major
/// operands. Leading batch dims of size 1 broadcast, as do bias dims of size 1.
pub struct ReferenceMatmulDesc {
    src: TensorDesc,
    weights: TensorDesc,
    bias: Option<TensorDesc>,
    dst: TensorDesc,
    attr: PrimitiveAttr,
    registry: ScratchRegistry,
}

impl ReferenceMatmulDesc {
    pub fn new(
        src: &TensorDesc,
        weights: &TensorDesc,
        bias: Option<&TensorDesc>,
        dst: &TensorDesc,
        attr: &PrimitiveAttr,
    ) -> Result<Self> {
        attr.validate()?;

        let ndims = dst.ndims();
        if ndims < 2 || src.ndims() != ndims || weights.ndims() != ndims {
            return Err(ConvError::InvalidArguments(format!(
                "Matmul operands must share a rank of at least 2: {} × {} -> {}",
                src, weights, dst
            )));
        }

        let resolve = |desc: &TensorDesc| -> Result<TensorDesc> {
            let desc = desc.resolve_layout(Layout::ChannelFirst);
            if desc.layout() != Layout::ChannelFirst {
                return Err(ConvError::Unimplemented(format!(
                    "Reference matmul only runs on plain row-major operands, got {}",
                    desc
                )));
            }
            Ok(desc)
        };
        let src = resolve(src)?;
        let weights = resolve(weights)?;
        let dst = resolve(dst)?;
        let bias = bias.map(resolve).transpose()?;

        let (m, k) = (src.dims()[ndims - 2], src.dims()[ndims - 1]);
        let (wk, n) = (weights.dims()[ndims - 2], weights.dims()[ndims - 1]);
        if k != wk || dst.dims()[ndims - 2] != m || dst.dims()[ndims - 1] != n {
            return Err(ConvError::InvalidArguments(format!(
                "Matmul shapes do not agree: {} × {} -> {}",
                src, weights, dst
            )));
        }

        for axis in 0..ndims - 2 {
            let batch = dst.dims()[axis];
            for operand in [&src, &weights] {
                let dim = operand.dims()[axis];
                if dim != batch && dim != 1 {
                    return Err(ConvError::InvalidArguments(format!(
                        "Matmul batch dim {} of {} does not broadcast to {}",
                        axis, operand, dst
                    )));
                }
            }
        }

        if let Some(bias) = &bias {
            let fits = bias.ndims() == ndims
                && bias
                    .dims()
                    .iter()
                    .zip(dst.dims())
                    .all(|(&b, &d)| b == d || b == 1);
            if !fits {
                return Err(ConvError::InvalidArguments(format!(
                    "Matmul bias {} does not broadcast to {}",
                    bias, dst
                )));
            }
        }

        let data_type = dst.data_type();
        let mut registry = ScratchRegistry::new();
        registry.book(KEY_MATMUL_PACKED_WEIGHTS, k * n, data_type)?;

        Ok(Self {
            src,
            weights,
            bias,
            dst,
            attr: attr.clone(),
            registry,
        })
    }
}

impl PrimitiveDesc for ReferenceMatmulDesc {
    fn name(&self) -> String {
        "ref:matmul".to_string()
    }

    fn src_desc(&self) -> &TensorDesc {
        &self.src
    }

    fn weights_desc(&self) -> Option<&TensorDesc> {
        Some(&self.weights)
    }

    fn bias_desc(&self) -> Option<&TensorDesc> {
        self.bias.as_ref()
    }

    fn dst_desc(&self) -> &TensorDesc {
        &self.dst
    }

    fn scratch_registry(&self) -> &ScratchRegistry {
        &self.registry
    }

    fn create_primitive(&self, engine: &dyn Engine) -> Result<Arc<dyn Primitive>> {
        let ndims = self.dst.ndims();
        Ok(Arc::new(ReferenceMatmul {
            m: self.dst.dims()[ndims - 2],
            n: self.dst.dims()[ndims - 1],
            k: self.src.dims()[ndims - 1],
            batch_dims: self.dst.dims()[..ndims - 2].to_vec(),
            src: self.src.clone(),
            weights: self.weights.clone(),
            bias: self.bias.clone(),
            dst: self.dst.clone(),
            attr: self.attr.clone(),
            parallel: ParallelFill::new(engine),
        }))
    }
}

pub struct ReferenceMatmul {
    m: usize,
    n: usize,
    k: usize,
    batch_dims: Vec<usize>,
    src: TensorDesc,
    weights: TensorDesc,
    bias: Option<TensorDesc>,
    dst: TensorDesc,
    attr: PrimitiveAttr,
    parallel: ParallelFill,
}

impl ReferenceMatmul {
    // Offset of the first element of batch `index` in `desc`, broadcasting size 1 dims
    fn batch_offset(desc: &TensorDesc, index: &[usize]) -> usize {
        let strides = desc.strides();
        index
            .iter()
            .zip(desc.dims())
            .zip(&strides)
            .map(|((&idx, &dim), &stride)| if dim == 1 { 0 } else { idx * stride })
            .sum()
    }

    fn check_len(&self, kind: ArgKind, desc: &TensorDesc, len: usize) -> Result<()> {
        if len != desc.num_elements() {
            return Err(ConvError::InvalidArguments(format!(
                "Matmul {:?} buffer has {} elements, {} needs {}",
                kind,
                len,
                desc,
                desc.num_elements()
            )));
        }
        Ok(())
    }
}

impl Primitive for ReferenceMatmul {
    fn name(&self) -> String {
        "ref:matmul".to_string()
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<()> {
        let src = ctx.input(ArgKind::Src)?;
        let weights = ctx.input(ArgKind::Weights)?;
        let bias = match &self.bias {
            Some(desc) => {
                let bias = ctx.input(ArgKind::Bias)?;
                self.check_len(ArgKind::Bias, desc, bias.len())?;
                Some(bias)
            }
            None => None,
        };
        self.check_len(ArgKind::Src, &self.src, src.len())?;
        self.check_len(ArgKind::Weights, &self.weights, weights.len())?;

        let packed = ctx.scratch().take(KEY_MATMUL_PACKED_WEIGHTS)?;
        let packed = packed.get_mut(..self.k * self.n).ok_or_else(|| {
            ConvError::RuntimeError("Matmul packed weights scratch is too small".to_string())
        })?;

        let dst = ctx.take_output(ArgKind::Dst)?;
        self.check_len(ArgKind::Dst, &self.dst, dst.len())?;

        let (m, n, k) = (self.m, self.n, self.k);
        let batches: usize = self.batch_dims.iter().product();
        let batch_desc = TensorDesc::new(
            self.batch_dims.clone(),
            self.dst.data_type(),
            Layout::ChannelFirst,
        );
        let mut index = vec![0; self.batch_dims.len()];
        let bias_strides = self.bias.as_ref().map(|desc| desc.strides());

        trace!(batches, m, n, k, "executing reference matmul");

        for batch in 0..batches {
            batch_desc.unravel(batch, &mut index);
            let src_base = Self::batch_offset(&self.src, &index);
            let wei_base = Self::batch_offset(&self.weights, &index);

            // Transpose this batch's weights so the k loop reads contiguously
            let wei = &weights[wei_base..wei_base + k * n];
            for (col, packed_col) in packed.chunks_mut(k.max(1)).enumerate().take(n) {
                for (kk, value) in packed_col.iter_mut().enumerate() {
                    *value = wei[kk * n + col];
                }
            }
            let packed_ro: &[f32] = &*packed;

            let dst_batch = &mut dst[batch * m * n..(batch + 1) * m * n];
            let a = &src[src_base..src_base + m * k];

            self.parallel.fill(dst_batch, n, |start, row_out| {
                let row = start / n.max(1);
                let a_row = &a[row * k..(row + 1) * k];
                let mut bias_index = index.clone();
                bias_index.extend([row, 0]);
                for (col, value) in row_out.iter_mut().enumerate() {
                    let b_col = &packed_ro[col * k..(col + 1) * k];
                    let mut acc = 0.0f32;
                    for kk in 0..k {
                        acc += a_row[kk] * b_col[kk];
                    }
                    if let (Some(bias), Some(desc), Some(strides)) =
                        (bias, &self.bias, &bias_strides)
                    {
                        bias_index[self.batch_dims.len() + 1] = col;
                        let offset: usize = bias_index
                            .iter()
                            .zip(desc.dims())
                            .zip(strides)
                            .map(|((&idx, &dim), &stride)| if dim == 1 { 0 } else { idx * stride })
                            .sum();
                        acc += bias[offset];
                    }
                    *value = self.attr.apply(acc, *value);
                }
            });
        }

        Ok(())
    }
}
