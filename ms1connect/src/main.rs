use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use ms1core::algorithm::edge_similarity::{EdgeSimOpts, ScanStrategy};
use ms1core::algorithm::matroid::MatroidOpts;
use ms1core::data::feature::PticPolicy;

use ms1connect::io::config::{load_json, save_json_pretty};
use ms1connect::io::naming::{PairId, RUN_OPTS};
use ms1connect::io::tables::{check_run_set, read_edge_table};
use ms1connect::optimizer::{Optimizer, SubprocessOptimizer};
use ms1connect::pipeline::{
    aggregate_from_files, runs_from_metadata, sort_edge_file, top_n_file, Pipeline, PipelineOpts,
};

#[derive(Parser)]
#[command(name = "ms1connect")]
#[command(about = "Pairwise MS1 run similarity from matched feature edges")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Keep the most intense features of a feature table
    TopN {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// number of features to keep
        #[arg(short = 'n', long, default_value = "5000")]
        top: usize,
        #[arg(long, value_enum, default_value = "original")]
        ptic: PticArg,
        /// drop features below this pTIC before selecting
        #[arg(long)]
        ptic_min: Option<f64>,
        /// drop features above this pTIC before selecting
        #[arg(long)]
        ptic_max: Option<f64>,
    },
    /// Order an edge table by left-run retention time
    SortEdges {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Build the similarity matrix and matroid document of one run pair
    EdgeMatrix {
        /// folder with <run>_ms1Peak.txt tables
        #[arg(long)]
        features: PathBuf,
        /// edge table <left>___<right>___score.txt
        #[arg(long)]
        edges: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        #[command(flatten)]
        sim: SimArgs,
        #[command(flatten)]
        matroid: MatroidArgs,
    },
    /// Write the matroid constraint document of one edge table
    Matroid {
        #[arg(long)]
        edges: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        #[command(flatten)]
        matroid: MatroidArgs,
    },
    /// Process every edge table of a folder, optionally score and aggregate
    Run {
        #[arg(long)]
        features: PathBuf,
        /// folder with <left>___<right>___score.txt tables
        #[arg(long)]
        edges: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        /// run metadata table; enables aggregation into output_score_matrix.txt
        #[arg(long)]
        metadata: Option<PathBuf>,
        /// optimizer binary, called as <binary> <args..> <matrix> <matroid>
        #[arg(long)]
        optimizer: Option<PathBuf>,
        #[arg(long = "optimizer-arg", allow_hyphen_values = true)]
        optimizer_args: Vec<String>,
        /// kill an optimizer call after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// worker threads, 0 lets rayon decide
        #[arg(short, long, default_value = "0")]
        threads: usize,
        #[arg(long)]
        progress: bool,
        #[command(flatten)]
        sim: SimArgs,
        #[command(flatten)]
        matroid: MatroidArgs,
    },
    /// Build the run matrix from a batch optimizer log and the pair metadata table
    Aggregate {
        #[arg(long)]
        score_log: PathBuf,
        /// pairwise_meta.txt written by `run` or `edge-matrix`
        #[arg(long)]
        meta_table: PathBuf,
        #[arg(long)]
        metadata: PathBuf,
        /// feature folder to check the metadata run set against
        #[arg(long)]
        features: Option<PathBuf>,
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PticArg {
    Original,
    Recompute,
}

impl From<PticArg> for PticPolicy {
    fn from(arg: PticArg) -> Self {
        match arg {
            PticArg::Original => PticPolicy::Original,
            PticArg::Recompute => PticPolicy::RecomputeOverRetained,
        }
    }
}

/// Similarity weights; flags override values from `--config`.
#[derive(Args)]
struct SimArgs {
    /// JSON file with edge similarity options
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    start_tol: Option<f64>,
    #[arg(long)]
    lambda1: Option<f64>,
    #[arg(long)]
    lambda2: Option<f64>,
    #[arg(long)]
    lambda3: Option<f64>,
    #[arg(long)]
    lambda4: Option<f64>,
    #[arg(long)]
    alpha1: Option<f64>,
    #[arg(long)]
    alpha2: Option<f64>,
    #[arg(long)]
    alpha3: Option<f64>,
    /// visit every edge pair instead of the banded scan; edges need not be sorted
    #[arg(long)]
    full_scan: bool,
}

impl SimArgs {
    fn resolve(&self) -> Result<EdgeSimOpts> {
        let mut opts: EdgeSimOpts = match &self.config {
            Some(path) => load_json(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => EdgeSimOpts::default(),
        };
        let overrides = [
            (self.start_tol, &mut opts.start_tol),
            (self.lambda1, &mut opts.lambda1),
            (self.lambda2, &mut opts.lambda2),
            (self.lambda3, &mut opts.lambda3),
            (self.lambda4, &mut opts.lambda4),
            (self.alpha1, &mut opts.alpha1),
            (self.alpha2, &mut opts.alpha2),
            (self.alpha3, &mut opts.alpha3),
        ];
        for (flag, field) in overrides {
            if let Some(v) = flag {
                *field = v;
            }
        }
        if self.full_scan {
            opts.scan = ScanStrategy::Full;
        }
        Ok(opts)
    }
}

#[derive(Args)]
struct MatroidArgs {
    /// max selected edges per feature on each side
    #[arg(long, default_value = "1")]
    limit: usize,
    /// rebuild matroid documents that already exist
    #[arg(long)]
    overwrite: bool,
}

impl MatroidArgs {
    fn opts(&self) -> MatroidOpts {
        MatroidOpts { limit: self.limit, ..Default::default() }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::TopN { input, output, top, ptic, ptic_min, ptic_max } => {
            let range = match (ptic_min, ptic_max) {
                (None, None) => None,
                (min, max) => Some((min.unwrap_or(0.0), max.unwrap_or(1.0))),
            };
            let kept = top_n_file(&input, &output, top, ptic.into(), range)
                .with_context(|| format!("failed to select features from {}", input.display()))?;
            info!("kept {} features in {}", kept, output.display());
        }
        Command::SortEdges { input, output } => {
            let n = sort_edge_file(&input, &output)
                .with_context(|| format!("failed to sort {}", input.display()))?;
            info!("sorted {} edges into {}", n, output.display());
        }
        Command::EdgeMatrix { features, edges, out, sim, matroid } => {
            let opts = PipelineOpts {
                edge_sim: sim.resolve()?,
                matroid: matroid.opts(),
                overwrite: matroid.overwrite,
                ..Default::default()
            };
            let pipeline = Pipeline::new(features, &out, opts)?;
            let (pair, meta) = pipeline.build_and_record_pair(&edges)?;
            info!("{}: {} edges, post norm {:.4}", pair.stem, meta.n_edges, meta.post_norm_val);
        }
        Command::Matroid { edges, out, matroid } => {
            let opts = PipelineOpts {
                matroid: matroid.opts(),
                overwrite: matroid.overwrite,
                ..Default::default()
            };
            let pair = PairId::from_edge_path(&edges)?;
            let table = read_edge_table(&edges)
                .with_context(|| format!("failed to read {}", edges.display()))?;
            let pipeline = Pipeline::new(PathBuf::new(), &out, opts)?;
            let path = pipeline.write_matroid(&pair, &table)?;
            info!("wrote {}", path.display());
        }
        Command::Run {
            features,
            edges,
            out,
            metadata,
            optimizer,
            optimizer_args,
            timeout_secs,
            threads,
            progress,
            sim,
            matroid,
        } => {
            let runs = match &metadata {
                Some(path) => {
                    let runs = runs_from_metadata(path)
                        .with_context(|| format!("failed to read metadata {}", path.display()))?;
                    check_run_set(&features, &runs)?;
                    Some(runs)
                }
                None => None,
            };
            if runs.is_some() && optimizer.is_none() {
                bail!("--metadata needs --optimizer to produce pair scores");
            }

            let opts = PipelineOpts {
                edge_sim: sim.resolve()?,
                matroid: matroid.opts(),
                num_threads: threads,
                overwrite: matroid.overwrite,
                progress,
            };
            let pipeline = Pipeline::new(features, &out, opts)?;
            save_json_pretty(&out.join(RUN_OPTS), &pipeline.opts)?;
            let pairs = Pipeline::discover_pairs(&edges)?;
            if pairs.is_empty() {
                bail!("no <left>___<right>___score.txt tables in {}", edges.display());
            }

            let solver = optimizer.map(|program| {
                SubprocessOptimizer::new(program)
                    .with_args(optimizer_args)
                    .with_timeout(timeout_secs.map(Duration::from_secs))
            });
            let solver = solver.as_ref().map(|s| s as &dyn Optimizer);
            let outcomes = pipeline.run_pairs(&pairs, solver)?;

            if let Some(runs) = runs {
                pipeline.aggregate(&runs, &outcomes)?;
            }
        }
        Command::Aggregate { score_log, meta_table, metadata, features, out } => {
            aggregate_from_files(&score_log, &meta_table, &metadata, features.as_deref(), &out)?;
        }
    }
    Ok(())
}
