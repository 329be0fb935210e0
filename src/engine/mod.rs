pub mod config;
pub mod cpu_engine;
pub mod engine;
pub mod error;
