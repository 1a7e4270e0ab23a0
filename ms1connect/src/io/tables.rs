use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use log::debug;
use ms1core::data::edge::{Edge, EdgeTable};
use ms1core::data::feature::{Feature, FeatureTable};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::io::naming::{run_from_feature_path, run_from_file_name};

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Reads a tab-separated `mz intensity RT pTIC charge` table.
pub fn read_feature_table(path: &Path) -> Result<FeatureTable, PipelineError> {
    let mut reader = ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    let features = reader.deserialize::<Feature>().collect::<Result<Vec<_>, _>>()?;
    debug!("read {} features from {}", features.len(), path.display());
    Ok(FeatureTable::new(features))
}

/// Writes a feature table, m/z, RT and pTIC rounded to four decimals.
pub fn write_feature_table(path: &Path, table: &FeatureTable) -> Result<(), PipelineError> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["mz", "intensity", "RT", "pTIC", "charge"])?;
    for f in &table.features {
        writer.write_record(&[
            round4(f.mz).to_string(),
            f.intensity.to_string(),
            round4(f.rt).to_string(),
            round4(f.ptic).to_string(),
            f.charge.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a tab-separated edge table with the
/// `leftFileIndex rightFileIndex mzDiff ticDiff leftFileRT` header.
pub fn read_edge_table(path: &Path) -> Result<EdgeTable, PipelineError> {
    let mut reader = ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    let edges = reader.deserialize::<Edge>().collect::<Result<Vec<_>, _>>()?;
    debug!("read {} edges from {}", edges.len(), path.display());
    Ok(EdgeTable::new(edges))
}

const EDGE_HEADER: [&str; 5] =
    ["leftFileIndex", "rightFileIndex", "mzDiff", "ticDiff", "leftFileRT"];

pub fn write_edge_table(path: &Path, table: &EdgeTable) -> Result<(), PipelineError> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    if table.is_empty() {
        writer.write_record(EDGE_HEADER)?;
    }
    for e in &table.edges {
        writer.serialize(e)?;
    }
    writer.flush()?;
    Ok(())
}

/// One row of the run metadata table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "metadataLabel")]
    pub label: String,
}

impl RunMeta {
    pub fn run(&self) -> String {
        run_from_file_name(&self.file_name)
    }
}

/// Reads the metadata table; its row order is the row order of the run matrix.
pub fn read_run_metadata(path: &Path) -> Result<Vec<RunMeta>, PipelineError> {
    let mut reader = ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    let rows = reader.deserialize::<RunMeta>().collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Run names of every `_ms1Peak.txt` table in a folder, sorted.
pub fn list_feature_runs(feature_dir: &Path) -> Result<Vec<String>, PipelineError> {
    let mut runs = Vec::new();
    for entry in fs::read_dir(feature_dir)? {
        let path = entry?.path();
        if let Some(run) = run_from_feature_path(&path) {
            runs.push(run);
        }
    }
    runs.sort();
    Ok(runs)
}

/// The metadata must list exactly the runs that have a feature table.
pub fn check_run_set(feature_dir: &Path, runs: &[String]) -> Result<(), PipelineError> {
    let on_disk: BTreeSet<String> = list_feature_runs(feature_dir)?.into_iter().collect();
    let listed: BTreeSet<String> = runs.iter().cloned().collect();
    if on_disk == listed {
        return Ok(());
    }
    Err(PipelineError::RunSetMismatch {
        only_in_metadata: listed.difference(&on_disk).cloned().collect(),
        only_in_features: on_disk.difference(&listed).cloned().collect(),
    })
}
