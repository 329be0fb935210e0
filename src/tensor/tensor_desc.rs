use std::fmt;

use crate::engine::error::{ConvError, Result};

use super::{data_type::DataType, layout::Layout};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    dims: Vec<usize>,
    data_type: DataType,
    layout: Layout,
}

impl TensorDesc {
    pub fn new(dims: Vec<usize>, data_type: DataType, layout: Layout) -> Self {
        Self {
            dims,
            data_type,
            layout,
        }
    }

    pub fn new_f32(dims: Vec<usize>, layout: Layout) -> Self {
        Self::new(dims, DataType::F32, layout)
    }

    pub fn any(dims: Vec<usize>) -> Self {
        Self::new(dims, DataType::F32, Layout::Any)
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn is_any(&self) -> bool {
        self.layout == Layout::Any
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn has_zero_dim(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }

    pub fn with_layout(&self, layout: Layout) -> Self {
        Self {
            dims: self.dims.clone(),
            data_type: self.data_type,
            layout,
        }
    }

    // Any is left for the implementation to decide, everything else must match exactly
    pub fn resolve_layout(&self, default: Layout) -> Self {
        if self.is_any() {
            self.with_layout(default)
        } else {
            self.clone()
        }
    }

    /// Element strides per logical axis. `Any` is treated as dense row-major.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![0; self.ndims()];
        let mut stride = 1;
        for &axis in self.layout.physical_order(self.ndims()).iter().rev() {
            strides[axis] = stride;
            stride *= self.dims[axis];
        }
        strides
    }

    /// Logical index of the element stored at `offset`, written into `index`.
    pub fn unravel(&self, offset: usize, index: &mut [usize]) {
        let mut rem = offset;
        for &axis in self.layout.physical_order(self.ndims()).iter().rev() {
            index[axis] = rem % self.dims[axis];
            rem /= self.dims[axis];
        }
    }

    /// Builds a mapper from dense offsets in `self` to offsets in `other`.
    /// Both descriptors must share the same logical dims.
    pub fn offset_mapper(&self, other: &TensorDesc) -> Result<OffsetMapper> {
        if self.dims != other.dims {
            return Err(ConvError::InvalidArguments(format!(
                "Cannot map offsets between dims {:?} and {:?}",
                self.dims, other.dims
            )));
        }

        let other_strides = other.strides();
        let axes = self
            .layout
            .physical_order(self.ndims())
            .into_iter()
            .rev()
            .map(|axis| (self.dims[axis], other_strides[axis]))
            .collect();

        Ok(OffsetMapper { axes })
    }

    /// Reinterprets the same memory under new dims. Only dense row-major (or not yet
    /// chosen) layouts can be reshaped without moving data.
    pub fn reshape(&self, new_dims: &[usize]) -> Result<TensorDesc> {
        if self.layout == Layout::ChannelLast {
            return Err(ConvError::InvalidArguments(format!(
                "Cannot reshape {} tensor {:?} without reordering",
                self.layout.tag_name(self.ndims()),
                self.dims
            )));
        }

        let new_elements: usize = new_dims.iter().product();
        if new_elements != self.num_elements() {
            return Err(ConvError::InvalidArguments(format!(
                "Cannot reshape {} elements into {:?} ({} elements)",
                self.num_elements(),
                new_dims,
                new_elements
            )));
        }

        Ok(Self {
            dims: new_dims.to_vec(),
            data_type: self.data_type,
            layout: self.layout,
        })
    }
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("×");
        write!(
            f,
            "{}:{}:{}",
            self.data_type.name(),
            self.layout.tag_name(self.ndims()),
            dims
        )
    }
}

/// Translates a dense offset in one layout into the offset of the same logical element
/// in another layout, without allocating per element.
#[derive(Clone, Debug)]
pub struct OffsetMapper {
    // (dim, stride in target) from innermost to outermost source axis
    axes: Vec<(usize, usize)>,
}

impl OffsetMapper {
    pub fn map(&self, offset: usize) -> usize {
        let mut rem = offset;
        let mut mapped = 0;
        for &(dim, stride) in &self.axes {
            mapped += (rem % dim) * stride;
            rem /= dim;
        }
        mapped
    }
}
