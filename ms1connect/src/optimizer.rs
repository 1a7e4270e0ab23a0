use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use ms1core::algorithm::run_similarity::PairScore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::io::naming::PAIR_DELIM;

/// Marker of the line announcing the raw edge count, `Loaded raw SPSSD <n>x<n> ...`.
pub const RAW_EDGES_MARKER: &str = "Loaded raw SPSSD ";
/// Marker of the result line, `Summary valuation: |A|=<selected>, ... = <score>`.
pub const SUMMARY_MARKER: &str = "Summary valuation:";
/// Marker introducing one invocation in a batch score log, `filename___<left>___<right>___...`.
pub const PAIR_MARKER: &str = "filename___";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizerReport {
    pub n_edges: usize,
    pub n_selected: usize,
    pub score: f64,
}

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("failed to launch optimizer '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("optimizer exited with {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },
    #[error("optimizer did not finish within {0:?}")]
    Timeout(Duration),
    #[error("malformed optimizer log: {0}")]
    MalformedLog(String),
}

/// Selects a constrained maximum-weight edge subset for one run pair.
pub trait Optimizer: Send + Sync {
    fn solve(
        &self,
        matrix_path: &Path,
        constraint_path: &Path,
    ) -> Result<OptimizerReport, OptimizerError>;
}

fn raw_edges_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Loaded raw SPSSD (\d+)x\d+").expect("valid regex"))
}

fn parse_raw_edges(line: &str) -> Option<usize> {
    raw_edges_re().captures(line).and_then(|c| c[1].parse().ok())
}

/// `(selected, score)` from a summary line: the first comma field holds `...=<selected>`,
/// the text after the last `=` is the score.
fn parse_summary(line: &str) -> Result<(usize, f64), OptimizerError> {
    let malformed = || OptimizerError::MalformedLog(line.to_string());
    let first = line.split(',').next().ok_or_else(malformed)?;
    let selected: usize = first
        .split('=')
        .nth(1)
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(malformed)?;
    let score: f64 = line
        .rsplit('=')
        .next()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(malformed)?;
    Ok((selected, score))
}

/// Parses the log of a single optimizer invocation; the last occurrence of each marker wins.
pub fn parse_optimizer_log(log: &str) -> Result<OptimizerReport, OptimizerError> {
    let mut n_edges = None;
    let mut summary = None;
    for line in log.lines() {
        if line.starts_with(RAW_EDGES_MARKER) {
            let n = parse_raw_edges(line)
                .ok_or_else(|| OptimizerError::MalformedLog(line.to_string()))?;
            n_edges = Some(n);
        } else if line.starts_with(SUMMARY_MARKER) {
            summary = Some(parse_summary(line)?);
        }
    }
    match (n_edges, summary) {
        (Some(n_edges), Some((n_selected, score))) => {
            Ok(OptimizerReport { n_edges, n_selected, score })
        }
        (None, _) => {
            let marker = RAW_EDGES_MARKER.trim_end();
            Err(OptimizerError::MalformedLog(format!("no '{}' line", marker)))
        }
        (_, None) => Err(OptimizerError::MalformedLog(format!("no '{}' line", SUMMARY_MARKER))),
    }
}

/// Parses a batch log holding many invocations. Invocations with a malformed summary or
/// without a preceding pair marker are skipped with a warning.
pub fn parse_score_log(log: &str) -> Vec<PairScore> {
    let mut scores = Vec::new();
    let mut pair: Option<(String, String)> = None;
    let mut n_edges = 0usize;

    for line in log.lines() {
        if line.starts_with(PAIR_MARKER) {
            let parts: Vec<&str> = line.trim_end().split(PAIR_DELIM).collect();
            pair = match (parts.get(1), parts.get(2)) {
                (Some(l), Some(r)) => Some((l.to_string(), r.to_string())),
                _ => {
                    warn!("malformed pair marker line: {}", line);
                    None
                }
            };
            n_edges = 0;
        } else if line.starts_with(RAW_EDGES_MARKER) {
            match parse_raw_edges(line) {
                Some(n) => n_edges = n,
                None => warn!("malformed raw edge line: {}", line),
            }
        } else if line.starts_with(SUMMARY_MARKER) {
            let Some((left, right)) = pair.clone() else {
                warn!("summary line without a pair marker: {}", line);
                continue;
            };
            match parse_summary(line) {
                Ok((n_selected, score)) => {
                    scores.push(PairScore { left, right, n_edges, n_selected, score })
                }
                Err(e) => warn!("{}{}{}: {}", left, PAIR_DELIM, right, e),
            }
        }
    }
    scores
}

/// Runs an external optimizer binary as `<program> <args..> <matrix> <constraints>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubprocessOptimizer {
    pub program: PathBuf,
    /// arguments placed before the matrix and constraint paths
    pub args: Vec<String>,
    /// kill the child after this long; `None` waits forever
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl SubprocessOptimizer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

fn drain<R: Read + Send + 'static>(mut source: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        let _ = source.read_to_string(&mut buf);
        buf
    })
}

impl Optimizer for SubprocessOptimizer {
    fn solve(
        &self,
        matrix_path: &Path,
        constraint_path: &Path,
    ) -> Result<OptimizerReport, OptimizerError> {
        let program = self.program.display().to_string();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(matrix_path)
            .arg(constraint_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| OptimizerError::Launch { program: program.clone(), source })?;

        // drained on their own threads so a chatty child never blocks on a full pipe
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => return Err(OptimizerError::Launch { program, source }),
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(OptimizerError::Timeout(limit));
                }
            }
            thread::sleep(self.poll_interval);
        };

        let out = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
        let err = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
        debug!("{} finished with {} after {:?}", program, status, started.elapsed());

        if !status.success() {
            return Err(OptimizerError::NonZeroExit {
                status: status.to_string(),
                stderr: err.trim().to_string(),
            });
        }
        parse_optimizer_log(&out)
    }
}
