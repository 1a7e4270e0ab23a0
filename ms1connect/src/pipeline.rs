use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use ms1core::algorithm::edge_similarity::{
    EdgeMatrixMeta, EdgeSimOpts, EdgeSimilarity, ScanStrategy,
};
use ms1core::algorithm::matroid::{MatroidDocument, MatroidOpts};
use ms1core::algorithm::run_similarity::{PairNorm, PairScore, RunSimilarityMatrix};
use ms1core::data::edge::EdgeTable;
use ms1core::data::feature::PticPolicy;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::io::matrix::{
    post_norms, read_meta_table, save_matrix, upsert_meta_table, write_meta_table,
};
use crate::io::naming::{feature_path, PairId, META_TABLE, PAIR_DELIM, SCORE_MATRIX};
use crate::io::tables::{
    check_run_set, read_edge_table, read_feature_table, read_run_metadata, write_edge_table,
    write_feature_table,
};
use crate::optimizer::{parse_score_log, Optimizer};

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})";

/// Settings of a whole pipeline run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOpts {
    pub edge_sim: EdgeSimOpts,
    pub matroid: MatroidOpts,
    /// worker threads, 0 lets rayon decide
    pub num_threads: usize,
    /// rebuild matroid documents that already exist
    pub overwrite: bool,
    /// draw a progress bar over run pairs
    pub progress: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PairStatus {
    /// optimizer (or the empty-table shortcut) produced a score
    Scored(PairScore),
    /// artifacts written, no optimizer was run
    Built,
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct PairOutcome {
    pub pair: PairId,
    /// present once the matrix was built
    pub meta: Option<EdgeMatrixMeta>,
    pub status: PairStatus,
}

impl PairOutcome {
    pub fn score(&self) -> Option<&PairScore> {
        match &self.status {
            PairStatus::Scored(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, PairStatus::Failed(_))
    }
}

/// Builds per-pair similarity artifacts from a feature folder into an output folder.
pub struct Pipeline {
    pub feature_dir: PathBuf,
    pub out_dir: PathBuf,
    pub opts: PipelineOpts,
}

impl Pipeline {
    pub fn new(
        feature_dir: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
        opts: PipelineOpts,
    ) -> Result<Self, PipelineError> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)?;
        Ok(Pipeline { feature_dir: feature_dir.into(), out_dir, opts })
    }

    /// Edge files `<left>___<right>___score.txt` in a folder, sorted by name.
    pub fn discover_pairs(edge_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(edge_dir)? {
            let path = entry?.path();
            let is_edge_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&format!("{PAIR_DELIM}score.txt")))
                .unwrap_or(false);
            if is_edge_file && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Writes the matroid document of a pair unless it exists and `overwrite` is off.
    pub fn write_matroid(
        &self,
        pair: &PairId,
        edges: &EdgeTable,
    ) -> Result<PathBuf, PipelineError> {
        let path = pair.matroid_path(&self.out_dir);
        if path.exists() && !self.opts.overwrite {
            debug!("{} exists, keeping it", path.display());
            return Ok(path);
        }
        let doc = MatroidDocument::from_edges(edges, &self.opts.matroid);
        fs::write(&path, doc.to_json_pretty()?)?;
        Ok(path)
    }

    /// Loads one pair's tables, scores it and persists the matrix and matroid document.
    pub fn build_pair(&self, edge_path: &Path) -> Result<(PairId, EdgeMatrixMeta), PipelineError> {
        let pair = PairId::from_edge_path(edge_path)?;
        let wrap = |e: PipelineError| PipelineError::for_pair(&pair.stem, e);

        let left =
            read_feature_table(&feature_path(&self.feature_dir, &pair.left)).map_err(wrap)?;
        let right =
            read_feature_table(&feature_path(&self.feature_dir, &pair.right)).map_err(wrap)?;
        let edges = read_edge_table(edge_path).map_err(wrap)?;

        let left_view = left.scoring_view();
        let right_view = right.scoring_view();
        edges.check_bounds(left_view.len(), right_view.len()).map_err(|e| wrap(e.into()))?;
        if self.opts.edge_sim.scan == ScanStrategy::Banded {
            edges.check_sorted_by_left_ptic(&left_view.ptic).map_err(|e| wrap(e.into()))?;
        }

        let sim = EdgeSimilarity::compute(&edges, &left_view, &right_view, &self.opts.edge_sim)
            .map_err(|e| wrap(e.into()))?;
        save_matrix(&pair.matrix_path(&self.out_dir), &pair.stem, &sim.to_csr()).map_err(wrap)?;
        self.write_matroid(&pair, &edges).map_err(wrap)?;

        debug!("{}: {} edges, {} non-zeros", pair.stem, sim.n_edges, sim.nonzero_count());
        Ok((pair.clone(), sim.meta(&pair.stem)))
    }

    /// `build_pair` for a single pair, recording its row in the output folder's
    /// `pairwise_meta.txt` next to the rows of earlier pairs.
    pub fn build_and_record_pair(
        &self,
        edge_path: &Path,
    ) -> Result<(PairId, EdgeMatrixMeta), PipelineError> {
        let (pair, meta) = self.build_pair(edge_path)?;
        upsert_meta_table(&self.out_dir.join(META_TABLE), &meta)?;
        Ok((pair, meta))
    }

    fn run_pair(&self, edge_path: &Path, optimizer: Option<&dyn Optimizer>) -> PairOutcome {
        let (pair, meta) = match self.build_pair(edge_path) {
            Ok(built) => built,
            Err(e) => {
                warn!("skipping {}: {}", edge_path.display(), e);
                let pair = PairId::from_edge_path(edge_path).unwrap_or_else(|_| PairId {
                    left: String::new(),
                    right: String::new(),
                    stem: edge_path.display().to_string(),
                });
                return PairOutcome { pair, meta: None, status: PairStatus::Failed(e.to_string()) };
            }
        };

        let status = if meta.n_edges == 0 {
            debug!("{}: no edges, scoring 0 without the optimizer", pair.stem);
            PairStatus::Scored(PairScore {
                left: pair.left.clone(),
                right: pair.right.clone(),
                n_edges: 0,
                n_selected: 0,
                score: 0.0,
            })
        } else if let Some(optimizer) = optimizer {
            let matrix_path = pair.matrix_path(&self.out_dir);
            match optimizer.solve(&matrix_path, &pair.matroid_path(&self.out_dir)) {
                Ok(report) => PairStatus::Scored(PairScore {
                    left: pair.left.clone(),
                    right: pair.right.clone(),
                    n_edges: report.n_edges,
                    n_selected: report.n_selected,
                    score: report.score,
                }),
                Err(e) => {
                    warn!("optimizer failed for {}, pair excluded: {}", pair.stem, e);
                    PairStatus::Failed(e.to_string())
                }
            }
        } else {
            PairStatus::Built
        };

        PairOutcome { pair, meta: Some(meta), status }
    }

    /// Processes every edge file in parallel, then writes the pair metadata table.
    ///
    /// A failing pair is logged and reported in its outcome; the batch carries on.
    pub fn run_pairs(
        &self,
        edge_paths: &[PathBuf],
        optimizer: Option<&dyn Optimizer>,
    ) -> Result<Vec<PairOutcome>, PipelineError> {
        info!("processing {} run pairs", edge_paths.len());
        let pool = ThreadPoolBuilder::new().num_threads(self.opts.num_threads).build()?;

        let pb = if self.opts.progress {
            let pb = ProgressBar::new(edge_paths.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(PROGRESS_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let outcomes: Vec<PairOutcome> = pool.install(|| {
            edge_paths
                .par_iter()
                .map(|path| {
                    let outcome = self.run_pair(path, optimizer);
                    if let Some(pb) = &pb {
                        pb.inc(1);
                    }
                    outcome
                })
                .collect()
        });
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let metas: Vec<EdgeMatrixMeta> = outcomes.iter().filter_map(|o| o.meta.clone()).collect();
        write_meta_table(&self.out_dir.join(META_TABLE), &metas)?;

        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        info!("{} pairs done, {} failed", outcomes.len() - failed, failed);
        Ok(outcomes)
    }

    /// Run x run matrix from pipeline outcomes, written to `output_score_matrix.txt`.
    pub fn aggregate(
        &self,
        runs: &[String],
        outcomes: &[PairOutcome],
    ) -> Result<RunSimilarityMatrix, PipelineError> {
        let scores: Vec<PairScore> = outcomes.iter().filter_map(|o| o.score().cloned()).collect();
        let norms: Vec<PairNorm> = outcomes
            .iter()
            .filter(|o| o.score().is_some())
            .filter_map(|o| {
                o.meta.as_ref().map(|m| PairNorm {
                    left: o.pair.left.clone(),
                    right: o.pair.right.clone(),
                    value: m.post_norm_val,
                })
            })
            .collect();
        let matrix = RunSimilarityMatrix::build(runs, &scores, &norms)?;
        write_score_matrix(&self.out_dir.join(SCORE_MATRIX), &matrix)?;
        Ok(matrix)
    }
}

/// Run names in metadata row order.
pub fn runs_from_metadata(metadata: &Path) -> Result<Vec<String>, PipelineError> {
    Ok(read_run_metadata(metadata)?.iter().map(|r| r.run()).collect())
}

pub fn write_score_matrix(path: &Path, matrix: &RunSimilarityMatrix) -> Result<(), PipelineError> {
    fs::write(path, matrix.to_tsv())?;
    info!("wrote {}x{} run matrix to {}", matrix.len(), matrix.len(), path.display());
    Ok(())
}

/// Aggregation from files left by an earlier batch: the concatenated optimizer log,
/// the pair metadata table and the run metadata. With a feature folder the run set is
/// checked against its feature tables first.
pub fn aggregate_from_files(
    score_log: &Path,
    meta_table: &Path,
    metadata: &Path,
    feature_dir: Option<&Path>,
    out_dir: &Path,
) -> Result<RunSimilarityMatrix, PipelineError> {
    let runs = runs_from_metadata(metadata)?;
    if let Some(dir) = feature_dir {
        check_run_set(dir, &runs)?;
    }
    let scores = parse_score_log(&fs::read_to_string(score_log)?);
    let norms = post_norms(&read_meta_table(meta_table)?)?;
    info!("aggregating {} pair scores over {} runs", scores.len(), runs.len());

    let matrix = RunSimilarityMatrix::build(&runs, &scores, &norms)?;
    fs::create_dir_all(out_dir)?;
    write_score_matrix(&out_dir.join(SCORE_MATRIX), &matrix)?;
    Ok(matrix)
}

/// Reduces a feature table file to its `n` most intense features, optionally keeping
/// only features inside a pTIC range first.
pub fn top_n_file(
    input: &Path,
    output: &Path,
    n: usize,
    policy: PticPolicy,
    ptic_range: Option<(f64, f64)>,
) -> Result<usize, PipelineError> {
    let mut table = read_feature_table(input)?;
    if let Some((min, max)) = ptic_range {
        table = table.filter_ptic_range(min, max);
    }
    let kept = table.top_n_most_intense(n, policy);
    write_feature_table(output, &kept)?;
    Ok(kept.len())
}

/// Rewrites an edge table ordered by left-run retention time.
pub fn sort_edge_file(input: &Path, output: &Path) -> Result<usize, PipelineError> {
    let mut edges = read_edge_table(input)?;
    edges.sort_by_left_rt();
    write_edge_table(output, &edges)?;
    Ok(edges.len())
}
