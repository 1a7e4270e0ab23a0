pub mod error;

// data module
pub mod data {
    pub mod feature;
    pub mod edge;
}

// algorithm module
pub mod algorithm {
    pub mod edge_similarity;
    pub mod matroid;
    pub mod run_similarity;
}

pub use error::CoreError;
