//! Reinterpretations between convolution shaped and matmul shaped descriptors of the same
//! memory. None of these move data, they only relabel dims of a dense row-major tensor.

use crate::{
    engine::error::{ConvError, Result},
    tensor::tensor_desc::TensorDesc,
};

use super::conv_desc::ConvolutionDesc;

/// Activations `{n, c, sp...}` <-> `{n, [g], c/g, ∏sp}`.
///
/// Going back to convolution shape copies the dims of the request's src (or dst when
/// `is_dst`) descriptor.
pub fn reshape_activations(
    conv: &ConvolutionDesc,
    desc: &TensorDesc,
    to_matmul: bool,
    is_dst: bool,
) -> Result<TensorDesc> {
    let new_dims = if to_matmul {
        let groups = conv.groups();
        let dims = desc.dims();
        let mut new_dims = Vec::with_capacity(4);
        new_dims.push(dims[0]);
        if conv.with_groups() {
            new_dims.push(groups);
        }
        new_dims.push(dims[1] / groups);
        new_dims.push(dims[2..].iter().product());
        new_dims
    } else if is_dst {
        conv.dst_desc().dims().to_vec()
    } else {
        conv.src_desc().dims().to_vec()
    };

    reshape_in_place(desc, &new_dims)
}

/// Weights `{[g], o, i, 1...}` <-> `{1, [g], o, i}`. The spatial dims are expected to be
/// all 1 already.
pub fn reshape_weights(
    conv: &ConvolutionDesc,
    desc: &TensorDesc,
    to_matmul: bool,
) -> Result<TensorDesc> {
    let dims = desc.dims();
    let new_dims = if to_matmul {
        let kept = conv.with_groups() as usize + 2;
        let mut new_dims = Vec::with_capacity(kept + 1);
        new_dims.push(1);
        new_dims.extend_from_slice(&dims[..kept.min(dims.len())]);
        new_dims
    } else {
        let mut new_dims = dims.get(1..).unwrap_or_default().to_vec();
        new_dims.extend(std::iter::repeat(1).take(conv.ndims() - 2));
        new_dims
    };

    reshape_in_place(desc, &new_dims)
}

// Callers only ever reshape between shapes of the same size; anything else is a bug here
fn reshape_in_place(desc: &TensorDesc, new_dims: &[usize]) -> Result<TensorDesc> {
    let new_elements: usize = new_dims.iter().product();
    if new_elements != desc.num_elements() {
        return Err(ConvError::RuntimeError(format!(
            "Reshape of {} to {:?} changes the element count",
            desc, new_dims
        )));
    }

    desc.reshape(new_dims)
        .map_err(|err| ConvError::RuntimeError(format!("Reshape of {} failed: {}", desc, err)))
}
