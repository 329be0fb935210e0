use crate::{
    engine::error::{ConvError, Result},
    tensor::tensor_desc::TensorDesc,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropKind {
    ForwardTraining,
    ForwardInference,
    BackwardData,
    BackwardWeights,
}

impl PropKind {
    pub fn is_fwd(&self) -> bool {
        matches!(self, PropKind::ForwardTraining | PropKind::ForwardInference)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlgKind {
    // Let the implementation decide, resolves to Direct
    Auto,
    Direct,
    Winograd,
}

/// A convolution request. Activations are `{n, c, spatial...}`; weights are
/// `{oc, ic, k...}` or, grouped, `{g, oc/g, ic/g, k...}`; bias is `{oc}`.
/// Dilations count the step between kernel taps, 1 is a dense kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvolutionDesc {
    prop_kind: PropKind,
    alg_kind: AlgKind,
    src: TensorDesc,
    weights: TensorDesc,
    bias: Option<TensorDesc>,
    dst: TensorDesc,
    strides: Vec<usize>,
    dilations: Vec<usize>,
    padding_front: Vec<usize>,
    padding_back: Vec<usize>,
}

impl ConvolutionDesc {
    pub fn new(
        src: TensorDesc,
        weights: TensorDesc,
        bias: Option<TensorDesc>,
        dst: TensorDesc,
        strides: Vec<usize>,
        padding_front: Vec<usize>,
        padding_back: Vec<usize>,
    ) -> Result<Self> {
        let dilations = vec![1; src.ndims().saturating_sub(2)];
        Self::new_with(
            PropKind::ForwardInference,
            AlgKind::Direct,
            src,
            weights,
            bias,
            dst,
            strides,
            dilations,
            padding_front,
            padding_back,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_with(
        prop_kind: PropKind,
        alg_kind: AlgKind,
        src: TensorDesc,
        weights: TensorDesc,
        bias: Option<TensorDesc>,
        dst: TensorDesc,
        strides: Vec<usize>,
        dilations: Vec<usize>,
        padding_front: Vec<usize>,
        padding_back: Vec<usize>,
    ) -> Result<Self> {
        let desc = Self {
            prop_kind,
            alg_kind,
            src,
            weights,
            bias,
            dst,
            strides,
            dilations,
            padding_front,
            padding_back,
        };
        desc.check()?;
        Ok(desc)
    }

    fn check(&self) -> Result<()> {
        let ndims = self.src.ndims();
        if !(3..=5).contains(&ndims) {
            return Err(ConvError::InvalidArguments(format!(
                "Convolution supports 1 to 3 spatial dims, src has rank {}",
                ndims
            )));
        }
        if self.dst.ndims() != ndims {
            return Err(ConvError::InvalidArguments(format!(
                "Convolution src rank {} and dst rank {} differ",
                ndims,
                self.dst.ndims()
            )));
        }
        if self.weights.ndims() != ndims && self.weights.ndims() != ndims + 1 {
            return Err(ConvError::InvalidArguments(format!(
                "Convolution weights rank {} does not fit src rank {}",
                self.weights.ndims(),
                ndims
            )));
        }

        let nspatial = ndims - 2;
        for (name, values) in [
            ("strides", &self.strides),
            ("dilations", &self.dilations),
            ("padding_front", &self.padding_front),
            ("padding_back", &self.padding_back),
        ] {
            if values.len() != nspatial {
                return Err(ConvError::InvalidArguments(format!(
                    "Convolution {} has {} entries, expected {}",
                    name,
                    values.len(),
                    nspatial
                )));
            }
        }
        if self.strides.iter().chain(&self.dilations).any(|&v| v == 0) {
            return Err(ConvError::InvalidArguments(
                "Convolution strides and dilations must be at least 1".to_string(),
            ));
        }

        let data_type = self.src.data_type();
        let mismatched = [Some(&self.weights), self.bias.as_ref(), Some(&self.dst)]
            .into_iter()
            .flatten()
            .any(|desc| desc.data_type() != data_type);
        if mismatched {
            return Err(ConvError::InvalidArguments(
                "Convolution tensors must share one data type".to_string(),
            ));
        }

        if self.src.dims()[0] != self.dst.dims()[0] {
            return Err(ConvError::InvalidArguments(format!(
                "Convolution batch mismatch: src {} dst {}",
                self.src.dims()[0],
                self.dst.dims()[0]
            )));
        }

        let groups = self.groups();
        let (wei_oc, wei_ic) = (self.weights_oc(), self.weights_ic());
        if groups == 0 || self.ic() != groups * wei_ic || self.oc() != groups * wei_oc {
            return Err(ConvError::InvalidArguments(format!(
                "Convolution channels do not match weights: src c={}, dst c={}, weights {:?}",
                self.ic(),
                self.oc(),
                self.weights.dims()
            )));
        }

        if let Some(bias) = &self.bias {
            if bias.dims() != [self.oc()] {
                return Err(ConvError::InvalidArguments(format!(
                    "Convolution bias dims {:?} do not match {} output channels",
                    bias.dims(),
                    self.oc()
                )));
            }
        }

        for axis in 0..nspatial {
            let expected = Self::output_extent(
                self.src_spatial()[axis],
                self.kernel()[axis],
                self.strides[axis],
                self.dilations[axis],
                self.padding_front[axis],
                self.padding_back[axis],
            );
            if expected != Some(self.dst_spatial()[axis]) {
                return Err(ConvError::InvalidArguments(format!(
                    "Convolution dst spatial dim {} is {}, expected {:?}",
                    axis,
                    self.dst_spatial()[axis],
                    expected
                )));
            }
        }

        Ok(())
    }

    /// Output extent of one spatial axis, `None` when the kernel does not fit.
    pub fn output_extent(
        input: usize,
        kernel: usize,
        stride: usize,
        dilation: usize,
        pad_front: usize,
        pad_back: usize,
    ) -> Option<usize> {
        let padded = input + pad_front + pad_back;
        let reach = kernel.checked_sub(1)? * dilation + 1;
        if padded < reach {
            return None;
        }
        Some((padded - reach) / stride + 1)
    }

    /// Same request with different activation descriptors, weights and bias untouched.
    pub fn with_activation_descs(&self, src: TensorDesc, dst: TensorDesc) -> Result<Self> {
        let mut desc = self.clone();
        desc.src = src;
        desc.dst = dst;
        desc.check()?;
        Ok(desc)
    }

    /// Same request with the weights and bias descriptors replaced, typically once their
    /// layouts have been chosen.
    pub fn with_parameter_descs(
        &self,
        weights: TensorDesc,
        bias: Option<TensorDesc>,
    ) -> Result<Self> {
        let mut desc = self.clone();
        desc.weights = weights;
        desc.bias = bias;
        desc.check()?;
        Ok(desc)
    }

    pub fn with_alg_kind(&self, alg_kind: AlgKind) -> Self {
        let mut desc = self.clone();
        desc.alg_kind = alg_kind;
        desc
    }

    pub fn prop_kind(&self) -> PropKind {
        self.prop_kind
    }

    pub fn alg_kind(&self) -> AlgKind {
        self.alg_kind
    }

    pub fn src_desc(&self) -> &TensorDesc {
        &self.src
    }

    pub fn weights_desc(&self) -> &TensorDesc {
        &self.weights
    }

    pub fn bias_desc(&self) -> Option<&TensorDesc> {
        self.bias.as_ref()
    }

    pub fn dst_desc(&self) -> &TensorDesc {
        &self.dst
    }

    pub fn ndims(&self) -> usize {
        self.src.ndims()
    }

    pub fn with_groups(&self) -> bool {
        self.weights.ndims() == self.ndims() + 1
    }

    pub fn with_bias(&self) -> bool {
        self.bias.is_some()
    }

    pub fn groups(&self) -> usize {
        if self.with_groups() {
            self.weights.dims()[0]
        } else {
            1
        }
    }

    pub fn mb(&self) -> usize {
        self.src.dims()[0]
    }

    pub fn ic(&self) -> usize {
        self.src.dims()[1]
    }

    pub fn oc(&self) -> usize {
        self.dst.dims()[1]
    }

    fn weights_oc(&self) -> usize {
        self.weights.dims()[self.with_groups() as usize]
    }

    fn weights_ic(&self) -> usize {
        self.weights.dims()[self.with_groups() as usize + 1]
    }

    pub fn src_spatial(&self) -> &[usize] {
        &self.src.dims()[2..]
    }

    pub fn dst_spatial(&self) -> &[usize] {
        &self.dst.dims()[2..]
    }

    pub fn kernel(&self) -> &[usize] {
        &self.weights.dims()[self.with_groups() as usize + 2..]
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn dilations(&self) -> &[usize] {
        &self.dilations
    }

    pub fn padding_front(&self) -> &[usize] {
        &self.padding_front
    }

    pub fn padding_back(&self) -> &[usize] {
        &self.padding_back
    }

    pub fn has_zero_dim(&self) -> bool {
        [Some(&self.src), Some(&self.weights), self.bias.as_ref(), Some(&self.dst)]
            .into_iter()
            .flatten()
            .any(|desc| desc.has_zero_dim())
    }

    pub fn config_string(&self) -> String {
        format!(
            "g={}, mb={}, ic={}, oc={}, in={:?}, out={:?}, kernel={:?}, stride={:?}, dilation={:?}, pad={:?}/{:?}, bias={}",
            self.groups(),
            self.mb(),
            self.ic(),
            self.oc(),
            self.src_spatial(),
            self.dst_spatial(),
            self.kernel(),
            self.strides,
            self.dilations,
            self.padding_front,
            self.padding_back,
            self.with_bias()
        )
    }
}
