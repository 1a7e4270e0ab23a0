use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Side};

/// A candidate correspondence between a feature of the left run and one of the right run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(rename = "leftFileIndex")]
    pub left: usize,
    #[serde(rename = "rightFileIndex")]
    pub right: usize,
    #[serde(rename = "mzDiff")]
    pub mz_diff: f64,
    #[serde(rename = "ticDiff")]
    pub tic_diff: f64,
    #[serde(rename = "leftFileRT")]
    pub left_rt: f64,
}

impl Edge {
    pub fn new(left: usize, right: usize, mz_diff: f64, tic_diff: f64, left_rt: f64) -> Self {
        Edge { left, right, mz_diff, tic_diff, left_rt }
    }
}

/// Candidate edges of one run pair. Row position is the edge index used by the
/// similarity matrix and the matroid constraints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeTable {
    pub edges: Vec<Edge>,
}

impl EdgeTable {
    pub fn new(edges: Vec<Edge>) -> Self {
        EdgeTable { edges }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Orders edges by left-run retention time, ties broken by left feature index.
    pub fn sort_by_left_rt(&mut self) {
        self.edges.sort_by(|a, b| {
            a.left_rt
                .partial_cmp(&b.left_rt)
                .unwrap_or(Ordering::Equal)
                .then(a.left.cmp(&b.left))
        });
    }

    /// Every edge must point at an existing feature on both sides.
    pub fn check_bounds(&self, n_left: usize, n_right: usize) -> Result<(), CoreError> {
        for (i, e) in self.edges.iter().enumerate() {
            if e.left >= n_left {
                return Err(CoreError::FeatureIndexOutOfBounds {
                    side: Side::Left,
                    edge: i,
                    index: e.left,
                    len: n_left,
                });
            }
            if e.right >= n_right {
                return Err(CoreError::FeatureIndexOutOfBounds {
                    side: Side::Right,
                    edge: i,
                    index: e.right,
                    len: n_right,
                });
            }
        }
        Ok(())
    }

    /// Verifies the banded-scan precondition: left-feature pTIC never decreases along
    /// the edge order. Call after `check_bounds`.
    pub fn check_sorted_by_left_ptic(&self, left_ptic: &[f64]) -> Result<(), CoreError> {
        for (i, w) in self.edges.windows(2).enumerate() {
            let previous = left_ptic[w[0].left];
            let ptic = left_ptic[w[1].left];
            if ptic < previous {
                return Err(CoreError::UnsortedEdges { edge: i + 1, ptic, previous });
            }
        }
        Ok(())
    }
}
