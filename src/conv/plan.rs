use tracing::debug;

use crate::{
    engine::{engine::Engine, error::Result},
    primitive::{attributes::PrimitiveAttr, primitive::PrimitiveDesc},
    tensor::{layout::Layout, tensor_desc::TensorDesc},
};

use super::{
    conv_desc::ConvolutionDesc,
    shape_algebra::{reshape_activations, reshape_weights},
    strategy::Strategy,
};

/// Matmul view of a pointwise convolution. The roles are swapped so activations keep
/// their layout: the convolution weights are the matmul src and the convolution src is
/// the matmul weights.
pub struct MatmulPlan {
    // Conv src as matmul weights, {n, [g], ic/g, ∏sp}
    pub src: TensorDesc,
    // Conv weights as matmul src, {1, [g], oc/g, ic/g}
    pub weights: TensorDesc,
    // {n, [g], oc/g, ∏sp}
    pub dst: TensorDesc,
    pub matmul: Box<dyn PrimitiveDesc>,
}

pub struct ConvReorderPlan {
    pub src_nspc: TensorDesc,
    pub dst_nspc: TensorDesc,
    pub conv: Box<dyn PrimitiveDesc>,
    pub src_reorder: Box<dyn PrimitiveDesc>,
    // Only when a post-op reads the destination
    pub dst_pre_reorder: Option<Box<dyn PrimitiveDesc>>,
    pub dst_post_reorder: Box<dyn PrimitiveDesc>,
}

pub enum ExecutionPlan {
    Matmul(MatmulPlan),
    Reorder(ConvReorderPlan),
}

impl ExecutionPlan {
    pub fn build(
        strategy: Strategy,
        conv: &ConvolutionDesc,
        attr: &PrimitiveAttr,
        engine: &dyn Engine,
    ) -> Result<Self> {
        match strategy {
            Strategy::Matmul => Ok(Self::Matmul(MatmulPlan::build(conv, attr, engine)?)),
            Strategy::Reorder => Ok(Self::Reorder(ConvReorderPlan::build(conv, attr, engine)?)),
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            ExecutionPlan::Matmul(_) => Strategy::Matmul,
            ExecutionPlan::Reorder(_) => Strategy::Reorder,
        }
    }

    /// Weights and bias descriptors as the nested primitives settled them. Differs from
    /// the request only where the request left a layout as `Any`.
    pub fn resolved_parameter_descs(
        &self,
        conv: &ConvolutionDesc,
    ) -> Result<(TensorDesc, Option<TensorDesc>)> {
        match self {
            ExecutionPlan::Matmul(plan) => {
                let weights = if conv.weights_desc().is_any() {
                    reshape_weights(conv, plan.matmul.src_desc(), false)?
                } else {
                    conv.weights_desc().clone()
                };
                Ok((weights, conv.bias_desc().cloned()))
            }
            ExecutionPlan::Reorder(plan) => {
                let weights = match plan.conv.weights_desc() {
                    Some(chosen) if conv.weights_desc().is_any() => chosen.clone(),
                    _ => conv.weights_desc().clone(),
                };
                let bias = match (conv.bias_desc(), plan.conv.bias_desc()) {
                    (Some(requested), Some(chosen)) if requested.is_any() => Some(chosen.clone()),
                    (requested, _) => requested.cloned(),
                };
                Ok((weights, bias))
            }
        }
    }
}

impl MatmulPlan {
    fn build(conv: &ConvolutionDesc, attr: &PrimitiveAttr, engine: &dyn Engine) -> Result<Self> {
        let dst = reshape_activations(conv, conv.dst_desc(), true, true)?;
        let src = reshape_activations(conv, conv.src_desc(), true, false)?;
        let weights = reshape_weights(conv, conv.weights_desc(), true)?;

        let matmul = engine.matmul_desc(&weights, &src, None, &dst, attr)?;

        debug!(
            a = %weights,
            b = %src,
            c = %dst,
            matmul = %matmul.name(),
            "built matmul plan"
        );

        Ok(Self {
            src,
            weights,
            dst,
            matmul,
        })
    }
}

impl ConvReorderPlan {
    fn build(conv: &ConvolutionDesc, attr: &PrimitiveAttr, engine: &dyn Engine) -> Result<Self> {
        let src_nspc = conv.src_desc().with_layout(Layout::ChannelLast);
        let dst_nspc = conv.dst_desc().with_layout(Layout::ChannelLast);

        let inner = conv.with_activation_descs(src_nspc.clone(), dst_nspc.clone())?;
        let nspc_conv = engine.convolution_desc(&inner, attr)?;

        let src_reorder = engine.reorder_desc(conv.src_desc(), &src_nspc)?;
        let dst_pre_reorder = if attr.reads_destination() {
            Some(engine.reorder_desc(conv.dst_desc(), &dst_nspc)?)
        } else {
            None
        };
        let dst_post_reorder = engine.reorder_desc(&dst_nspc, conv.dst_desc())?;

        debug!(
            src = %src_nspc,
            dst = %dst_nspc,
            convolution = %nspc_conv.name(),
            dst_pre_reorder = dst_pre_reorder.is_some(),
            "built reorder plan"
        );

        Ok(Self {
            src_nspc,
            dst_nspc,
            conv: nspc_conv,
            src_reorder,
            dst_pre_reorder,
            dst_post_reorder,
        })
    }
}
