use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use log::debug;
use ms1core::algorithm::edge_similarity::{EdgeMatrix, EdgeMatrixMeta};
use ms1core::algorithm::run_similarity::PairNorm;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::io::naming::PairId;

const MATRIX_FILE_VERSION: u32 = 1;

/// On-disk layout of one pair's similarity matrix: uncompressed CSR, `f32` values.
#[derive(Serialize, Deserialize)]
pub struct PairwiseMatrixFile {
    pub version: u32,
    pub pair_id: String,
    pub matrix: EdgeMatrix,
}

impl PairwiseMatrixFile {
    pub fn new(pair_id: &str, matrix: EdgeMatrix) -> Self {
        Self { version: MATRIX_FILE_VERSION, pair_id: pair_id.to_string(), matrix }
    }
}

pub fn save_matrix(path: &Path, pair_id: &str, matrix: &EdgeMatrix) -> Result<(), PipelineError> {
    let mut bw = BufWriter::new(File::create(path)?);
    let file = PairwiseMatrixFile::new(pair_id, matrix.clone());
    let config = bincode::config::standard().with_fixed_int_encoding();
    bincode::serde::encode_into_std_write(&file, &mut bw, config)?;
    bw.flush()?;
    Ok(())
}

pub fn load_matrix(path: &Path) -> Result<PairwiseMatrixFile, PipelineError> {
    let mut br = BufReader::new(File::open(path)?);
    let config = bincode::config::standard().with_fixed_int_encoding();
    let file: PairwiseMatrixFile = bincode::serde::decode_from_std_read(&mut br, config)?;
    Ok(file)
}

/// Writes `pairId nEdges nonzeroCount postNormVal` lines, no header.
pub fn write_meta_table(path: &Path, metas: &[EdgeMatrixMeta]) -> Result<(), PipelineError> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').has_headers(false).from_path(path)?;
    for m in metas {
        writer.serialize(m)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_meta_table(path: &Path) -> Result<Vec<EdgeMatrixMeta>, PipelineError> {
    let mut reader = ReaderBuilder::new().delimiter(b'\t').has_headers(false).from_path(path)?;
    let metas = reader.deserialize::<EdgeMatrixMeta>().collect::<Result<Vec<_>, _>>()?;
    Ok(metas)
}

/// Records one pair in an existing table, replacing any row with the same pair id.
/// Other rows keep their order; a missing table is created.
pub fn upsert_meta_table(path: &Path, meta: &EdgeMatrixMeta) -> Result<(), PipelineError> {
    let mut metas = if path.exists() { read_meta_table(path)? } else { Vec::new() };
    let before = metas.len();
    metas.retain(|m| m.pair_id != meta.pair_id);
    if metas.len() != before {
        debug!("replacing {} in {}", meta.pair_id, path.display());
    }
    metas.push(meta.clone());
    write_meta_table(path, &metas)
}

/// Post-norm factors keyed by the runs named in each pair id.
pub fn post_norms(metas: &[EdgeMatrixMeta]) -> Result<Vec<PairNorm>, PipelineError> {
    metas
        .iter()
        .map(|m| {
            let pair = PairId::from_stem(&m.pair_id)?;
            Ok(PairNorm { left: pair.left, right: pair.right, value: m.post_norm_val })
        })
        .collect()
}
