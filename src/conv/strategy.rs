use std::fmt;

use crate::{
    engine::error::{ConvError, Result},
    primitive::attributes::PrimitiveAttr,
    tensor::layout::Layout,
};

use super::conv_desc::{AlgKind, ConvolutionDesc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    // One matmul over reshaped views of the user buffers
    Matmul,
    // Reorder to channel-last, convolve there, reorder back
    Reorder,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Matmul => write!(f, "matmul"),
            Strategy::Reorder => write!(f, "reorder"),
        }
    }
}

/// Requests neither path can serve. `desc` must already have its src/dst `Any` layouts
/// resolved.
pub fn check_preconditions(desc: &ConvolutionDesc, attr: &PrimitiveAttr) -> Result<()> {
    if !desc.prop_kind().is_fwd() {
        return Err(ConvError::Unimplemented(format!(
            "Channel-first adapter is forward only, got {:?}",
            desc.prop_kind()
        )));
    }
    if desc.alg_kind() != AlgKind::Direct {
        return Err(ConvError::Unimplemented(format!(
            "Channel-first adapter needs a direct algorithm, got {:?}",
            desc.alg_kind()
        )));
    }
    if desc.has_zero_dim() {
        return Err(ConvError::Unimplemented(
            "Channel-first adapter does not handle zero sized tensors".to_string(),
        ));
    }
    for (name, layout) in [
        ("src", desc.src_desc().layout()),
        ("dst", desc.dst_desc().layout()),
        ("weights", desc.weights_desc().layout()),
    ] {
        if layout == Layout::ChannelLast {
            return Err(ConvError::Unimplemented(format!(
                "Channel-first adapter does not take a channel-last {}",
                name
            )));
        }
    }

    attr.validate()
}

pub fn is_matmul_equivalent(desc: &ConvolutionDesc, attr: &PrimitiveAttr) -> bool {
    let channel_first = |layout: Layout| layout == Layout::ChannelFirst;

    desc.prop_kind().is_fwd()
        && desc.alg_kind() == AlgKind::Direct
        && attr.has_default_values()
        && !desc.has_zero_dim()
        && channel_first(desc.src_desc().layout())
        && channel_first(desc.dst_desc().layout())
        && desc.kernel().iter().all(|&k| k == 1)
        && desc.padding_front().iter().all(|&p| p == 0)
        && desc.padding_back().iter().all(|&p| p == 0)
        && desc.strides().iter().all(|&s| s == 1)
        && !desc.with_bias()
}

pub fn select_strategy(desc: &ConvolutionDesc, attr: &PrimitiveAttr) -> Result<Strategy> {
    check_preconditions(desc, attr)?;

    if is_matmul_equivalent(desc, attr) {
        Ok(Strategy::Matmul)
    } else {
        Ok(Strategy::Reorder)
    }
}
