use std::io;

use ms1core::CoreError;
use thiserror::Error;

use crate::optimizer::OptimizerError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to read table: {0}")]
    Table(#[from] csv::Error),
    #[error("failed to handle JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode matrix: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode matrix: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("optimizer failed: {0}")]
    Optimizer(#[from] OptimizerError),
    #[error("file name '{0}' does not follow <left>___<right>___<suffix>")]
    MalformedFileName(String),
    #[error(
        "runs in metadata and feature folder differ \
         (only in metadata: {only_in_metadata:?}, only in features: {only_in_features:?})"
    )]
    RunSetMismatch {
        only_in_metadata: Vec<String>,
        only_in_features: Vec<String>,
    },
    #[error("run pair {pair}: {source}")]
    Pair {
        pair: String,
        #[source]
        source: Box<PipelineError>,
    },
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl PipelineError {
    pub fn for_pair(pair: &str, source: PipelineError) -> Self {
        PipelineError::Pair { pair: pair.to_string(), source: Box::new(source) }
    }
}
