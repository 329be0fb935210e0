pub mod conv_desc;
pub mod ncsp_convolution;
pub mod plan;
pub mod scratch_plan;
pub mod shape_algebra;
pub mod strategy;
