use std::collections::HashMap;

use itertools::Itertools;
use log::{debug, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Optimizer outcome for one run pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairScore {
    pub left: String,
    pub right: String,
    /// raw edges the optimizer loaded
    pub n_edges: usize,
    /// edges in the selected subset
    pub n_selected: usize,
    pub score: f64,
}

/// Post-normalization factor of one run pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairNorm {
    pub left: String,
    pub right: String,
    pub value: f64,
}

/// Dense symmetric run x run similarity, rows and columns in metadata order.
#[derive(Clone, Debug)]
pub struct RunSimilarityMatrix {
    pub runs: Vec<String>,
    pub scores: Array2<f64>,
    pub n_edges: Array2<usize>,
}

fn run_index(runs: &[String]) -> HashMap<&str, usize> {
    runs.iter().enumerate().map(|(i, r)| (r.as_str(), i)).collect()
}

impl RunSimilarityMatrix {
    /// Fills the matrix from pair scores. Pairs naming a run outside `runs` are skipped,
    /// pairs never scored stay zero.
    pub fn from_scores(runs: &[String], scores: &[PairScore]) -> Self {
        let n = runs.len();
        let index = run_index(runs);
        let mut matrix = Array2::<f64>::zeros((n, n));
        let mut n_edges = Array2::<usize>::zeros((n, n));

        for s in scores {
            match (index.get(s.left.as_str()), index.get(s.right.as_str())) {
                (Some(&a), Some(&b)) => {
                    matrix[(a, b)] = s.score;
                    matrix[(b, a)] = s.score;
                    n_edges[(a, b)] = s.n_edges;
                    n_edges[(b, a)] = s.n_edges;
                }
                _ => debug!("ignoring score for {} / {}: run not in metadata", s.left, s.right),
            }
        }

        RunSimilarityMatrix { runs: runs.to_vec(), scores: matrix, n_edges }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Every run must have a non-zero self score. A two-run matrix is exempt.
    pub fn check_diagonal(&self) -> Result<(), CoreError> {
        if self.len() == 2 {
            return Ok(());
        }
        for (i, run) in self.runs.iter().enumerate() {
            if self.scores[(i, i)] == 0.0 {
                return Err(CoreError::ZeroDiagonal { run: run.clone(), index: i });
            }
        }
        Ok(())
    }

    /// Multiplies each pair's cells by its factor, both orientations off the diagonal.
    pub fn post_normalize(&mut self, norms: &[PairNorm]) {
        let index = run_index(&self.runs);
        for norm in norms {
            match (index.get(norm.left.as_str()), index.get(norm.right.as_str())) {
                (Some(&a), Some(&b)) => {
                    self.scores[(a, b)] *= norm.value;
                    if a != b {
                        self.scores[(b, a)] *= norm.value;
                    }
                }
                _ => warn!(
                    "post-norm value for {} / {} has no run in metadata, skipped",
                    norm.left, norm.right
                ),
            }
        }
    }

    /// Assemble, validate, then post-normalize.
    pub fn build(
        runs: &[String],
        scores: &[PairScore],
        norms: &[PairNorm],
    ) -> Result<Self, CoreError> {
        let mut matrix = Self::from_scores(runs, scores);
        matrix.check_diagonal()?;
        matrix.post_normalize(norms);
        Ok(matrix)
    }

    /// Tab-separated dump, one row per run, six decimals.
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        for row in self.scores.rows() {
            out.push_str(&row.iter().map(|v| format!("{:.6}", v)).join("\t"));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn score(left: &str, right: &str, value: f64) -> PairScore {
        PairScore {
            left: left.into(),
            right: right.into(),
            n_edges: 10,
            n_selected: 5,
            score: value,
        }
    }

    fn norm(left: &str, right: &str, value: f64) -> PairNorm {
        PairNorm { left: left.into(), right: right.into(), value }
    }

    fn full_corpus() -> Vec<PairScore> {
        vec![
            score("a", "a", 4.0),
            score("a", "b", 2.0),
            score("b", "b", 5.0),
            score("a", "c", 1.0),
            score("b", "c", 3.0),
            score("c", "c", 6.0),
        ]
    }

    #[test]
    fn test_matrix_is_symmetric_in_metadata_order() {
        let m = RunSimilarityMatrix::from_scores(&runs(&["c", "a", "b"]), &full_corpus());
        assert_eq!(m.scores[(1, 2)], 2.0);
        assert_eq!(m.scores[(2, 1)], 2.0);
        assert_eq!(m.scores[(0, 0)], 6.0);
        assert_eq!(m.n_edges[(0, 1)], 10);
    }

    #[test]
    fn test_missing_self_score_fails_for_three_runs() {
        let scores: Vec<PairScore> = full_corpus()
            .into_iter()
            .filter(|s| !(s.left == "b" && s.right == "b"))
            .collect();
        let res = RunSimilarityMatrix::build(&runs(&["a", "b", "c"]), &scores, &[]);
        match res {
            Err(CoreError::ZeroDiagonal { run, index }) => {
                assert_eq!(run, "b");
                assert_eq!(index, 1);
            }
            other => panic!("expected zero diagonal, got {:?}", other.map(|m| m.to_tsv())),
        }
    }

    #[test]
    fn test_two_runs_skip_diagonal_check() {
        let res = RunSimilarityMatrix::build(&runs(&["a", "b"]), &[score("a", "b", 2.0)], &[]);
        assert!(res.is_ok());
    }

    #[test]
    fn test_post_normalize() {
        let norms = vec![norm("a", "a", 0.5), norm("a", "b", 2.0), norm("x", "a", 9.0)];
        let names = runs(&["a", "b", "c"]);
        let m = RunSimilarityMatrix::build(&names, &full_corpus(), &norms).unwrap();
        assert_eq!(m.scores[(0, 0)], 2.0);
        assert_eq!(m.scores[(0, 1)], 4.0);
        assert_eq!(m.scores[(1, 0)], 4.0);
        assert_eq!(m.scores[(2, 2)], 6.0);
    }

    #[test]
    fn test_unknown_runs_and_missing_pairs_are_tolerated() {
        let mut scores = full_corpus();
        scores.retain(|s| !(s.left == "a" && s.right == "c"));
        scores.push(score("a", "zz", 8.0));
        let m = RunSimilarityMatrix::build(&runs(&["a", "b", "c"]), &scores, &[]).unwrap();
        assert_eq!(m.scores[(0, 2)], 0.0);
    }

    #[test]
    fn test_tsv_dump() {
        let m = RunSimilarityMatrix::from_scores(&runs(&["a", "b"]), &[score("a", "b", 1.5)]);
        assert_eq!(m.to_tsv(), "0.000000\t1.500000\n1.500000\t0.000000\n");
    }
}
