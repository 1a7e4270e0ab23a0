use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Separator between run names in per-pair file names.
pub const PAIR_DELIM: &str = "___";
/// Suffix of a feature table file stem, `<run>_ms1Peak.txt`.
pub const FEATURE_SUFFIX: &str = "_ms1Peak";
pub const FEATURE_EXT: &str = "txt";
pub const MATRIX_SUFFIX: &str = "___pairwise.bin";
pub const MATROID_SUFFIX: &str = "___matroid.json";
pub const META_TABLE: &str = "pairwise_meta.txt";
pub const SCORE_MATRIX: &str = "output_score_matrix.txt";
/// resolved options of a `run`, written next to its outputs
pub const RUN_OPTS: &str = "pipeline_opts.json";

/// Identity of a run pair, parsed from an edge file stem `<left>___<right>___score`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PairId {
    pub left: String,
    pub right: String,
    /// full stem, used as the pair id in metadata tables
    pub stem: String,
}

impl PairId {
    pub fn from_stem(stem: &str) -> Result<Self, PipelineError> {
        let mut parts = stem.split(PAIR_DELIM);
        match (parts.next(), parts.next()) {
            (Some(left), Some(right)) if !left.is_empty() && !right.is_empty() => Ok(PairId {
                left: left.to_string(),
                right: right.to_string(),
                stem: stem.to_string(),
            }),
            _ => Err(PipelineError::MalformedFileName(stem.to_string())),
        }
    }

    pub fn from_edge_path(path: &Path) -> Result<Self, PipelineError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| PipelineError::MalformedFileName(path.display().to_string()))?;
        Self::from_stem(stem)
    }

    /// Stem of an edge file for two runs.
    pub fn edge_stem(left: &str, right: &str) -> String {
        format!("{left}{PAIR_DELIM}{right}{PAIR_DELIM}score")
    }

    pub fn matrix_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("{}{}", self.stem, MATRIX_SUFFIX))
    }

    pub fn matroid_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("{}{}", self.stem, MATROID_SUFFIX))
    }
}

pub fn feature_path(feature_dir: &Path, run: &str) -> PathBuf {
    feature_dir.join(format!("{run}{FEATURE_SUFFIX}.{FEATURE_EXT}"))
}

/// Run name of a feature table path, `None` when it is not a `_ms1Peak.txt` file.
pub fn run_from_feature_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some(FEATURE_EXT) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.strip_suffix(FEATURE_SUFFIX).map(|s| s.to_string())
}

/// Run name of a metadata `fileName` entry: its file stem.
pub fn run_from_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_from_edge_path() {
        let path = Path::new("/data/edges/runA___runB___score.txt");
        let pair = PairId::from_edge_path(path).unwrap();
        assert_eq!(pair.left, "runA");
        assert_eq!(pair.right, "runB");
        assert_eq!(pair.stem, "runA___runB___score");
        assert_eq!(
            pair.matrix_path(Path::new("out")),
            PathBuf::from("out/runA___runB___score___pairwise.bin")
        );
        assert_eq!(
            pair.matroid_path(Path::new("out")),
            PathBuf::from("out/runA___runB___score___matroid.json")
        );
    }

    #[test]
    fn test_malformed_stem() {
        assert!(matches!(PairId::from_stem("single"), Err(PipelineError::MalformedFileName(_))));
    }

    #[test]
    fn test_feature_paths() {
        let p = feature_path(Path::new("feat"), "runA");
        assert_eq!(p, PathBuf::from("feat/runA_ms1Peak.txt"));
        assert_eq!(run_from_feature_path(&p), Some("runA".to_string()));
        assert_eq!(run_from_feature_path(Path::new("feat/notes.txt")), None);
        assert_eq!(run_from_file_name("raw/runA.mzML"), "runA");
        assert_eq!(PairId::edge_stem("a", "b"), "a___b___score");
    }
}
