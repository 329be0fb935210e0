pub mod attributes;
pub mod exec_ctx;
pub mod primitive;
