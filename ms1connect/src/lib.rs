// src/lib.rs
pub mod error;

pub mod io {
    pub mod naming;
    pub mod tables;
    pub mod matrix;
    pub mod config;
}

pub mod optimizer;
pub mod pipeline;

pub use error::PipelineError;
