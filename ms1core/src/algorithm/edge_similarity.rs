use log::debug;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

use crate::data::edge::EdgeTable;
use crate::data::feature::FeatureView;
use crate::error::{CoreError, Side};

/// Symmetric edge x edge similarity of one run pair, CSR with `f32` values.
pub type EdgeMatrix = CsMat<f32>;

/// How the off-diagonal pairs are enumerated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStrategy {
    /// stop the inner scan once the left pTIC gap exceeds `start_tol`; needs edges
    /// ordered by non-decreasing left pTIC
    #[default]
    Banded,
    /// visit every pair, no ordering assumption
    Full,
}

/// Weights and tolerances of the edge similarity score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeSimOpts {
    /// Max pTIC difference between the left features, and between the right features,
    /// of two edges for the pair to be scored.
    pub start_tol: f64,
    /// weight of the per-edge count term
    pub lambda1: f64,
    /// weight of the per-edge intensity product term
    pub lambda2: f64,
    /// weight of the per-edge pTIC alignment term
    pub lambda3: f64,
    /// weight of the pairwise edge-shift term
    pub lambda4: f64,
    /// decay of the pTIC alignment term
    pub alpha1: f64,
    /// decay on the tic-difference gap between two edges
    pub alpha2: f64,
    /// decay on the left pTIC gap between two edges
    pub alpha3: f64,
    pub scan: ScanStrategy,
}

impl Default for EdgeSimOpts {
    fn default() -> Self {
        Self {
            start_tol: 0.01,
            lambda1: 1.0,
            lambda2: 1.0,
            lambda3: 1.0,
            lambda4: 1.0,
            alpha1: 1.0,
            alpha2: 1.0,
            alpha3: 1.0,
            scan: ScanStrategy::Banded,
        }
    }
}

/// Raw (pre-normalization) totals of the four term families.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FamilySums {
    pub count: f64,
    pub intensity: f64,
    pub ptic: f64,
    /// counts every gated pair twice, once per matrix cell
    pub edge_shift: f64,
}

/// Term families after dividing each by its own raw total.
#[derive(Clone, Debug, Default)]
pub struct TermFamilies {
    pub count: Vec<f64>,
    pub intensity: Vec<f64>,
    pub ptic: Vec<f64>,
    /// one value per gated unordered pair, aligned with `EdgeSimilarity::pairs`;
    /// stored in both `(i, j)` and `(j, i)`
    pub edge_shift: Vec<f64>,
}

/// Bookkeeping persisted next to each pair's matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeMatrixMeta {
    pub pair_id: String,
    pub n_edges: usize,
    pub nonzero_count: usize,
    pub post_norm_val: f64,
}

/// Scores of one run pair before packing into a sparse matrix.
#[derive(Clone, Debug)]
pub struct EdgeSimilarity {
    pub n_edges: usize,
    /// weighted self score per edge
    pub diagonal: Vec<f64>,
    /// gated unordered pairs `(i, j)` with `i < j`
    pub pairs: Vec<(u32, u32)>,
    /// weighted score per gated pair
    pub pair_scores: Vec<f64>,
    pub families: TermFamilies,
    pub sums: FamilySums,
    /// weighted sum of the raw family totals
    pub post_norm_val: f64,
}

fn normalize_family(values: &mut [f64], total: f64) {
    if total != 0.0 {
        for v in values.iter_mut() {
            *v /= total;
        }
    }
}

impl EdgeSimilarity {
    /// Scores every edge and every gated edge pair of one run pair.
    ///
    /// # Arguments
    ///
    /// * `edges` - candidate edges; with `ScanStrategy::Banded` they must be ordered by
    ///   non-decreasing left pTIC (edge tables sorted by left RT satisfy this)
    /// * `left`, `right` - scoring views of the two feature tables, intensities normalized
    /// * `opts` - weights and tolerances
    ///
    /// Fails when an edge points past the end of either feature table, or at a feature
    /// whose pTIC is not finite.
    pub fn compute(
        edges: &EdgeTable,
        left: &FeatureView,
        right: &FeatureView,
        opts: &EdgeSimOpts,
    ) -> Result<Self, CoreError> {
        edges.check_bounds(left.len(), right.len())?;
        check_finite_ptic(edges, left, right)?;
        let n = edges.len();

        // ---- flat per-edge arrays -------------------------------------------
        let left_ptic: Vec<f64> = edges.edges.iter().map(|e| left.ptic[e.left]).collect();
        let right_ptic: Vec<f64> = edges.edges.iter().map(|e| right.ptic[e.right]).collect();
        let tic_diff: Vec<f64> = edges.edges.iter().map(|e| e.tic_diff).collect();

        // ---- diagonal terms ---------------------------------------------------
        let mut count = vec![1.0; n];
        let mut intensity: Vec<f64> = edges
            .edges
            .iter()
            .map(|e| left.intensity[e.left] * right.intensity[e.right])
            .collect();
        let mut ptic: Vec<f64> = (0..n)
            .map(|i| (-opts.alpha1 * (left_ptic[i] - right_ptic[i]).abs()).exp())
            .collect();

        let mut sums = FamilySums {
            count: n as f64,
            intensity: intensity.iter().sum(),
            ptic: ptic.iter().sum(),
            edge_shift: 0.0,
        };

        // ---- off-diagonal terms -----------------------------------------------
        let (pairs, mut edge_shift) = scan_pairs(&left_ptic, &right_ptic, &tic_diff, opts);
        sums.edge_shift = 2.0 * edge_shift.iter().sum::<f64>();

        normalize_family(&mut count, sums.count);
        normalize_family(&mut intensity, sums.intensity);
        normalize_family(&mut ptic, sums.ptic);
        normalize_family(&mut edge_shift, sums.edge_shift);

        let diagonal: Vec<f64> = (0..n)
            .map(|i| opts.lambda1 * count[i] + opts.lambda2 * intensity[i] + opts.lambda3 * ptic[i])
            .collect();
        let pair_scores: Vec<f64> = edge_shift.iter().map(|v| opts.lambda4 * v).collect();

        let post_norm_val = opts.lambda1 * sums.count
            + opts.lambda2 * sums.intensity
            + opts.lambda3 * sums.ptic
            + opts.lambda4 * sums.edge_shift;

        debug!("scored {} edges, {} gated pairs, post norm {:.4}", n, pairs.len(), post_norm_val);

        Ok(EdgeSimilarity {
            n_edges: n,
            diagonal,
            pairs,
            pair_scores,
            families: TermFamilies { count, intensity, ptic, edge_shift },
            sums,
            post_norm_val,
        })
    }

    /// Diagonal entries plus both orientations of every gated pair.
    pub fn nonzero_count(&self) -> usize {
        self.n_edges + 2 * self.pairs.len()
    }

    pub fn meta(&self, pair_id: &str) -> EdgeMatrixMeta {
        EdgeMatrixMeta {
            pair_id: pair_id.to_string(),
            n_edges: self.n_edges,
            nonzero_count: self.nonzero_count(),
            post_norm_val: self.post_norm_val,
        }
    }

    /// Packs diagonal and pair scores into a symmetric `n x n` CSR matrix.
    /// Scores that are zero in `f32` are not stored.
    pub fn to_csr(&self) -> EdgeMatrix {
        let n = self.n_edges;
        let mut tri = TriMat::with_capacity((n, n), self.nonzero_count());
        for (i, &v) in self.diagonal.iter().enumerate() {
            let v = v as f32;
            if v != 0.0 {
                tri.add_triplet(i, i, v);
            }
        }
        for (&(i, j), &v) in self.pairs.iter().zip(self.pair_scores.iter()) {
            let v = v as f32;
            if v != 0.0 {
                tri.add_triplet(i as usize, j as usize, v);
                tri.add_triplet(j as usize, i as usize, v);
            }
        }
        tri.to_csr()
    }
}

fn check_finite_ptic(
    edges: &EdgeTable,
    left: &FeatureView,
    right: &FeatureView,
) -> Result<(), CoreError> {
    for (edge, e) in edges.edges.iter().enumerate() {
        let ends = [(Side::Left, e.left, &left.ptic), (Side::Right, e.right, &right.ptic)];
        for (side, index, ptic) in ends {
            let value = ptic[index];
            if !value.is_finite() {
                return Err(CoreError::NonFinitePtic { side, edge, index, value });
            }
        }
    }
    Ok(())
}

/// Raw edge-shift term of every gated pair `(i, j)`, `i < j`.
///
/// With `ScanStrategy::Banded` the inner loop stops at the first `j` whose left pTIC
/// exceeds edge `i`'s by more than `start_tol`: left pTIC is non-decreasing in `j`, so
/// no later `j` can pass the gate. Both strategies visit gated pairs in the same order.
fn scan_pairs(
    left_ptic: &[f64],
    right_ptic: &[f64],
    tic_diff: &[f64],
    opts: &EdgeSimOpts,
) -> (Vec<(u32, u32)>, Vec<f64>) {
    let n = left_ptic.len();
    let tol = opts.start_tol;
    let mut pairs = Vec::new();
    let mut values = Vec::new();

    for i in 0..n {
        for j in (i + 1)..n {
            let left_gap = left_ptic[j] - left_ptic[i];
            if opts.scan == ScanStrategy::Banded && left_gap > tol {
                break;
            }
            let gated = left_gap.abs() <= tol && (right_ptic[j] - right_ptic[i]).abs() <= tol;
            if !gated {
                continue;
            }
            let shift = (-opts.alpha2 * (tic_diff[i] - tic_diff[j]).abs()).exp();
            let start = (-opts.alpha3 * left_gap.abs()).exp();
            pairs.push((i as u32, j as u32));
            values.push(shift * start);
        }
    }

    (pairs, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::edge::Edge;
    use crate::data::feature::{Feature, FeatureTable};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn features(ptic: &[f64], intensity: &[f64]) -> FeatureTable {
        FeatureTable::new(
            ptic.iter()
                .zip(intensity.iter())
                .enumerate()
                .map(|(k, (&p, &i))| Feature::new(100.0 + k as f64, i, 10.0 * p, p, 2))
                .collect(),
        )
    }

    fn at(m: &EdgeMatrix, i: usize, j: usize) -> f32 {
        m.get(i, j).copied().unwrap_or(0.0)
    }

    fn two_edges() -> EdgeTable {
        EdgeTable::new(vec![
            Edge::new(0, 0, 0.0, 0.0, 1.0),
            Edge::new(1, 1, 0.0, 0.02, 1.001),
        ])
    }

    fn scenario(left_ptic_1: f64, opts: &EdgeSimOpts) -> EdgeMatrix {
        let left = features(&[0.50, left_ptic_1], &[100.0, 50.0]);
        let right = features(&[0.50, 0.507], &[80.0, 40.0]);
        EdgeSimilarity::compute(&two_edges(), &left.scoring_view(), &right.scoring_view(), opts)
            .unwrap()
            .to_csr()
    }

    fn random_pair(
        rng: &mut StdRng,
        n_feat: usize,
        n_edges: usize,
    ) -> (FeatureTable, FeatureTable, EdgeTable) {
        let mk = |rng: &mut StdRng| -> FeatureTable {
            let ptic: Vec<f64> = (0..n_feat).map(|_| rng.gen_range(0.0..0.2)).collect();
            let intensity: Vec<f64> = (0..n_feat).map(|_| rng.gen_range(1.0..1000.0)).collect();
            features(&ptic, &intensity)
        };
        let left = mk(rng);
        let right = mk(rng);
        let mut edges = EdgeTable::new(
            (0..n_edges)
                .map(|_| {
                    let l = rng.gen_range(0..n_feat);
                    let r = rng.gen_range(0..n_feat);
                    let tic = left.features[l].ptic - right.features[r].ptic;
                    Edge::new(l, r, 0.0, tic, left.features[l].ptic)
                })
                .collect(),
        );
        edges.sort_by_left_rt();
        (left, right, edges)
    }

    fn compute_default(
        left: &FeatureTable,
        right: &FeatureTable,
        edges: &EdgeTable,
    ) -> EdgeSimilarity {
        let opts = EdgeSimOpts::default();
        EdgeSimilarity::compute(edges, &left.scoring_view(), &right.scoring_view(), &opts).unwrap()
    }

    #[test]
    fn test_scenario_gated_pair_is_symmetric_and_nonzero() {
        let m = scenario(0.505, &EdgeSimOpts::default());
        assert!(at(&m, 0, 1) > 0.0);
        assert_eq!(at(&m, 0, 1), at(&m, 1, 0));
        assert_eq!(m.nnz(), 4);
        assert!(sprs::is_symmetric(&m));
    }

    #[test]
    fn test_scenario_gap_beyond_tolerance_zeroes_pair_only() {
        // alpha1 = 0 keeps the pTIC alignment term independent of the moved feature
        let opts = EdgeSimOpts { alpha1: 0.0, ..Default::default() };
        let near = scenario(0.505, &opts);
        let far = scenario(0.60, &opts);

        assert!(at(&near, 0, 1) > 0.0);
        assert_eq!(far.get(0, 1), None);
        assert_eq!(far.get(1, 0), None);
        assert_eq!(at(&near, 0, 0), at(&far, 0, 0));
        assert_eq!(at(&near, 1, 1), at(&far, 1, 1));
    }

    #[test]
    fn test_symmetry_gate_and_self_score() {
        let mut rng = StdRng::seed_from_u64(7);
        let opts = EdgeSimOpts::default();
        for _ in 0..10 {
            let (left, right, edges) = random_pair(&mut rng, 40, 120);
            let lv = left.scoring_view();
            let rv = right.scoring_view();
            let m = EdgeSimilarity::compute(&edges, &lv, &rv, &opts).unwrap().to_csr();

            assert!(sprs::is_symmetric(&m));
            for i in 0..edges.len() {
                assert!(at(&m, i, i) > 0.0);
                for j in 0..edges.len() {
                    if i == j {
                        continue;
                    }
                    let (a, b) = (&edges.edges[i], &edges.edges[j]);
                    let dl = (lv.ptic[a.left] - lv.ptic[b.left]).abs();
                    let dr = (rv.ptic[a.right] - rv.ptic[b.right]).abs();
                    if dl > opts.start_tol || dr > opts.start_tol {
                        assert_eq!(m.get(i, j), None);
                    }
                }
            }
        }
    }

    #[test]
    fn test_banded_scan_matches_full_scan() {
        let mut rng = StdRng::seed_from_u64(42);
        let banded = EdgeSimOpts::default();
        let full = EdgeSimOpts { scan: ScanStrategy::Full, ..Default::default() };

        for round in 0..25 {
            let (left, right, edges) = random_pair(&mut rng, 30 + round, 50 + 8 * round);
            let lv = left.scoring_view();
            let rv = right.scoring_view();
            let a = EdgeSimilarity::compute(&edges, &lv, &rv, &banded).unwrap();
            let b = EdgeSimilarity::compute(&edges, &lv, &rv, &full).unwrap();

            assert_eq!(a.pairs, b.pairs);
            assert_eq!(a.post_norm_val, b.post_norm_val);
            assert_eq!(a.to_csr(), b.to_csr());
        }
    }

    #[test]
    fn test_families_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(3);
        let (left, right, edges) = random_pair(&mut rng, 50, 200);
        let sim = compute_default(&left, &right, &edges);

        let f = &sim.families;
        assert!((f.count.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((f.intensity.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((f.ptic.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(!sim.pairs.is_empty());
        assert!((2.0 * f.edge_shift.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_families_are_left_at_zero() {
        let left = features(&[0.5, 0.505], &[0.0, 0.0]);
        let right = features(&[0.5, 0.506], &[0.0, 0.0]);
        let edges = EdgeTable::new(vec![
            Edge::new(0, 0, 0.0, 0.0, 0.5),
            Edge::new(1, 1, 0.0, 0.0, 0.505),
        ]);
        let opts = EdgeSimOpts { lambda2: 0.0, lambda3: 0.0, lambda4: 0.0, ..Default::default() };
        let (lv, rv) = (left.scoring_view(), right.scoring_view());
        let sim = EdgeSimilarity::compute(&edges, &lv, &rv, &opts).unwrap();

        assert_eq!(sim.sums.intensity, 0.0);
        assert!(sim.families.intensity.iter().all(|&v| v == 0.0));
        assert_eq!(sim.diagonal, vec![0.5, 0.5]);
        assert_eq!(sim.post_norm_val, 2.0);

        let m = sim.to_csr();
        // pair scores are zero with lambda4 = 0 and are not stored
        assert_eq!(m.nnz(), 2);
        assert_eq!(sim.nonzero_count(), 4);
    }

    #[test]
    fn test_post_norm_val_uses_raw_totals() {
        let left = features(&[0.5, 0.505], &[100.0, 50.0]);
        let right = features(&[0.5, 0.506], &[10.0, 10.0]);
        let edges = EdgeTable::new(vec![
            Edge::new(0, 0, 0.0, 0.0, 0.5),
            Edge::new(1, 1, 0.0, 0.0, 0.505),
        ]);
        let opts = EdgeSimOpts {
            lambda1: 2.0,
            lambda2: 3.0,
            lambda3: 0.0,
            lambda4: 0.0,
            ..Default::default()
        };
        let (lv, rv) = (left.scoring_view(), right.scoring_view());
        let sim = EdgeSimilarity::compute(&edges, &lv, &rv, &opts).unwrap();

        // counts 2, intensities 1.0 * 1.0 + 0.5 * 1.0
        assert!((sim.post_norm_val - (2.0 * 2.0 + 3.0 * 1.5)).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_bounds_edge_is_rejected() {
        let left = features(&[0.5], &[1.0]);
        let right = features(&[0.5], &[1.0]);
        let edges = EdgeTable::new(vec![
            Edge::new(0, 0, 0.0, 0.0, 0.5),
            Edge::new(1, 0, 0.0, 0.0, 0.6),
        ]);
        let opts = EdgeSimOpts::default();
        let (lv, rv) = (left.scoring_view(), right.scoring_view());
        let res = EdgeSimilarity::compute(&edges, &lv, &rv, &opts);
        assert!(matches!(res, Err(CoreError::FeatureIndexOutOfBounds { edge: 1, index: 1, .. })));
    }

    #[test]
    fn test_nan_ptic_is_rejected() {
        let left = features(&[0.5, f64::NAN], &[100.0, 50.0]);
        let right = features(&[0.5, 0.507], &[80.0, 40.0]);
        let opts = EdgeSimOpts::default();
        let (lv, rv) = (left.scoring_view(), right.scoring_view());
        let res = EdgeSimilarity::compute(&two_edges(), &lv, &rv, &opts);
        match res {
            Err(CoreError::NonFinitePtic { side, edge, index, value }) => {
                assert_eq!((side, edge, index), (Side::Left, 1, 1));
                assert!(value.is_nan());
            }
            other => panic!("unexpected {:?}", other.map(|s| s.n_edges)),
        }
    }

    #[test]
    fn test_nan_gap_never_passes_gate() {
        let opts = EdgeSimOpts { scan: ScanStrategy::Full, ..Default::default() };
        let (pairs, values) = scan_pairs(&[0.5, f64::NAN], &[0.5, 0.507], &[0.0, 0.02], &opts);
        assert!(pairs.is_empty());
        assert!(values.is_empty());

        let (pairs, _) = scan_pairs(&[0.5, 0.505], &[0.5, f64::NAN], &[0.0, 0.02], &opts);
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_empty_edge_table() {
        let left = features(&[0.5], &[1.0]);
        let sim = compute_default(&left, &left, &EdgeTable::default());
        let meta = sim.meta("a___b___score");
        assert_eq!((meta.n_edges, meta.nonzero_count, meta.post_norm_val), (0, 0, 0.0));
        let m = sim.to_csr();
        assert_eq!(m.shape(), (0, 0));
        assert_eq!(m.nnz(), 0);
    }
}
