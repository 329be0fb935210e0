pub mod parallel;
pub mod reference_convolution;
pub mod reference_matmul;
pub mod reorder;
