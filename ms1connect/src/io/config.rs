use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PipelineError;

/// Loads an options struct from JSON. Fields missing from the file keep their defaults
/// when the type is `#[serde(default)]`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

pub fn save_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms1core::algorithm::edge_similarity::{EdgeSimOpts, ScanStrategy};
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sim.json");
        std::fs::write(&path, r#"{"start_tol": 0.02, "lambda4": 3.0, "scan": "full"}"#).unwrap();

        let opts: EdgeSimOpts = load_json(&path).unwrap();
        assert_eq!(opts.start_tol, 0.02);
        assert_eq!(opts.lambda4, 3.0);
        assert_eq!(opts.lambda1, 1.0);
        assert_eq!(opts.scan, ScanStrategy::Full);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sim.json");
        let opts = EdgeSimOpts { alpha2: 5.0, ..Default::default() };
        save_json_pretty(&path, &opts).unwrap();
        let back: EdgeSimOpts = load_json(&path).unwrap();
        assert_eq!(back, opts);
    }
}
