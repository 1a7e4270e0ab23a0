use thiserror::Error;

/// Which run of a pair an edge endpoint lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(
        "edge {edge} references {side} feature {index}, but the {side} table has {len} features"
    )]
    FeatureIndexOutOfBounds {
        side: Side,
        edge: usize,
        index: usize,
        len: usize,
    },
    #[error("edge {edge} references {side} feature {index} with non-finite pTIC {value}")]
    NonFinitePtic {
        side: Side,
        edge: usize,
        index: usize,
        value: f64,
    },
    #[error("edges are not ordered by left pTIC: edge {edge} has pTIC {ptic} after {previous}")]
    UnsortedEdges { edge: usize, ptic: f64, previous: f64 },
    #[error(
        "run similarity diagonal is zero for run '{run}' (index {index}); \
         run is missing from the score corpus"
    )]
    ZeroDiagonal { run: String, index: usize },
}
