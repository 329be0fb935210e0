pub mod compute;
pub mod conv;
pub mod cpu;
pub mod engine;
pub mod primitive;
pub mod tensor;
