use std::sync::Arc;

use tracing::trace;

use crate::{
    compute::scratch_registry::ScratchRegistry,
    conv::conv_desc::{AlgKind, ConvolutionDesc},
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

const BLOCK_LEN: usize = 256;

/// Direct forward convolution over any plain activation layout. Every output element
/// accumulates input channels in ascending order, each over the kernel taps in row-major
/// order, then adds bias and applies post-ops. Taps that land in padding are skipped.
pub struct ReferenceConvolutionDesc {
    conv: ConvolutionDesc,
    attr: PrimitiveAttr,
    registry: ScratchRegistry,
}

impl ReferenceConvolutionDesc {
    pub fn new(desc: &ConvolutionDesc, attr: &PrimitiveAttr) -> Result<Self> {
        if !desc.prop_kind().is_fwd() {
            return Err(ConvError::Unimplemented(format!(
                "Reference convolution is forward only, got {:?}",
                desc.prop_kind()
            )));
        }
        if !matches!(desc.alg_kind(), AlgKind::Direct | AlgKind::Auto) {
            return Err(ConvError::Unimplemented(format!(
                "Reference convolution is direct only, got {:?}",
                desc.alg_kind()
            )));
        }
        if desc.weights_desc().layout() == Layout::ChannelLast
            || desc.bias_desc().is_some_and(|bias| bias.layout() == Layout::ChannelLast)
        {
            return Err(ConvError::Unimplemented(
                "Reference convolution needs plain weights and bias".to_string(),
            ));
        }
        attr.validate()?;

        let src = desc.src_desc().resolve_layout(Layout::ChannelFirst);
        let dst = desc.dst_desc().resolve_layout(Layout::ChannelFirst);
        let mut conv = desc
            .with_activation_descs(src, dst)?
            .with_alg_kind(AlgKind::Direct);
        let weights = desc.weights_desc().resolve_layout(Layout::ChannelFirst);
        let bias = desc
            .bias_desc()
            .map(|bias| bias.resolve_layout(Layout::ChannelFirst));
        conv = conv.with_parameter_descs(weights, bias)?;

        Ok(Self {
            conv,
            attr: attr.clone(),
            registry: ScratchRegistry::new(),
        })
    }

    pub fn create(
        desc: &ConvolutionDesc,
        attr: &PrimitiveAttr,
        _engine: &dyn Engine,
    ) -> Result<Box<dyn PrimitiveDesc>> {
        Ok(Box::new(Self::new(desc, attr)?))
    }
}

impl PrimitiveDesc for ReferenceConvolutionDesc {
    fn name(&self) -> String {
        format!(
            "ref:convolution:{}",
            self.conv.src_desc().layout().tag_name(self.conv.ndims())
        )
    }

    fn src_desc(&self) -> &TensorDesc {
        self.conv.src_desc()
    }

    fn weights_desc(&self) -> Option<&TensorDesc> {
        Some(self.conv.weights_desc())
    }

    fn bias_desc(&self) -> Option<&TensorDesc> {
        self.conv.bias_desc()
    }

    fn dst_desc(&self) -> &TensorDesc {
        self.conv.dst_desc()
    }

    fn scratch_registry(&self) -> &ScratchRegistry {
        &self.registry
    }

    fn create_primitive(&self, engine: &dyn Engine) -> Result<Arc<dyn Primitive>> {
        Ok(Arc::new(ReferenceConvolution {
            name: self.name(),
            conv: self.conv.clone(),
            attr: self.attr.clone(),
            src_strides: self.conv.src_desc().strides(),
            weights_strides: self.conv.weights_desc().strides(),
            parallel: ParallelFill::new(engine),
        }))
    }
}

pub struct ReferenceConvolution {
    name: String,
    conv: ConvolutionDesc,
    attr: PrimitiveAttr,
    src_strides: Vec<usize>,
    weights_strides: Vec<usize>,
    parallel: ParallelFill,
}

impl ReferenceConvolution {
    fn check_len(&self, kind: ArgKind, desc: &TensorDesc, len: usize) -> Result<()> {
        if len != desc.num_elements() {
            return Err(ConvError::InvalidArguments(format!(
                "Convolution {:?} buffer has {} elements, {} needs {}",
                kind,
                len,
                desc,
                desc.num_elements()
            )));
        }
        Ok(())
    }

    // Accumulated value of output element `index` = (n, oc, spatial...)
    fn compute_point(&self, src: &[f32], weights: &[f32], index: &[usize]) -> f32 {
        let conv = &self.conv;
        let nspatial = conv.ndims() - 2;
        let kernel = conv.kernel();
        let taps: usize = kernel.iter().product();
        let group_ic = conv.ic() / conv.groups();
        let group_oc = conv.oc() / conv.groups();

        let (n, oc) = (index[0], index[1]);
        let (g, oc_in_group) = (oc / group_oc, oc % group_oc);

        // Leading weights offset of (g, oc) and the stride of the input channel axis
        let wg = conv.with_groups() as usize;
        let mut wei_base = oc_in_group * self.weights_strides[wg];
        if conv.with_groups() {
            wei_base += g * self.weights_strides[0];
        }
        let wei_ic_stride = self.weights_strides[wg + 1];
        let wei_k_strides = &self.weights_strides[wg + 2..];

        let mut tap = [0usize; 3];
        let mut acc = 0.0f32;
        for ic in 0..group_ic {
            let src_c = g * group_ic + ic;
            let src_base = n * self.src_strides[0] + src_c * self.src_strides[1];
            let wei_ic_base = wei_base + ic * wei_ic_stride;

            'taps: for flat in 0..taps {
                let mut rem = flat;
                for axis in (0..nspatial).rev() {
                    tap[axis] = rem % kernel[axis];
                    rem /= kernel[axis];
                }

                let mut src_off = src_base;
                let mut wei_off = wei_ic_base;
                for axis in 0..nspatial {
                    let pos = (index[2 + axis] * conv.strides()[axis]
                        + tap[axis] * conv.dilations()[axis]) as isize
                        - conv.padding_front()[axis] as isize;
                    if pos < 0 || pos as usize >= conv.src_spatial()[axis] {
                        continue 'taps;
                    }
                    src_off += pos as usize * self.src_strides[2 + axis];
                    wei_off += tap[axis] * wei_k_strides[axis];
                }

                acc += weights[wei_off] * src[src_off];
            }
        }
        acc
    }
}

impl Primitive for ReferenceConvolution {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<()> {
        let conv = &self.conv;
        let src = ctx.input(ArgKind::Src)?;
        let weights = ctx.input(ArgKind::Weights)?;
        self.check_len(ArgKind::Src, conv.src_desc(), src.len())?;
        self.check_len(ArgKind::Weights, conv.weights_desc(), weights.len())?;

        let bias = match conv.bias_desc() {
            Some(desc) => {
                let bias = ctx.input(ArgKind::Bias)?;
                self.check_len(ArgKind::Bias, desc, bias.len())?;
                Some(bias)
            }
            None => None,
        };

        let dst = ctx.take_output(ArgKind::Dst)?;
        let dst_desc = conv.dst_desc();
        self.check_len(ArgKind::Dst, dst_desc, dst.len())?;

        trace!(convolution = %self.name, config = %conv.config_string(), "executing reference convolution");

        self.parallel.fill(dst, BLOCK_LEN, |start, block| {
            let mut index = [0usize; 5];
            let index = &mut index[..dst_desc.ndims()];
            for (i, value) in block.iter_mut().enumerate() {
                dst_desc.unravel(start + i, index);
                let mut result = self.compute_point(src, weights, index);
                if let Some(bias) = bias {
                    result += bias[index[1]];
                }
                *value = self.attr.apply(result, *value);
            }
        });

        Ok(())
    }
}
