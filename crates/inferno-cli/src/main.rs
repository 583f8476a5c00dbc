//! inferno CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inferno_ad::Tape;
use inferno_core::traits::LikelihoodObjective;
use inferno_inference::{
    BinnedSpec, NewtonProfiler, ProfilerConfig, StepGraph, fisher, likelihood_width_f64, linspace_step, profile_curve,
};
use inferno_train::{PaperSystematics, ToyConfig, argmax_shape, bin_hard, generate};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "inferno")]
#[command(about = "inferno - differentiable profile-likelihood diagnostics")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Profiled NLL curve over mu and the interval half-width
    Scan {
        /// Binned model (shapes JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Scan start (mu)
        #[arg(long, default_value = "20.0")]
        start: f64,

        /// Scan stop (mu, inclusive)
        #[arg(long, default_value = "80.0")]
        stop: f64,

        /// Scan step
        #[arg(long, default_value = "1.0")]
        step: f64,

        /// ΔNLL defining the interval (0.5 = 1σ)
        #[arg(long, default_value = "0.5")]
        threshold: f64,

        /// Newton profiler settings (JSON). Defaults to detached steps.
        #[arg(long)]
        profiler: Option<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inverse Fisher information at the true point
    Fisher {
        /// Binned model (shapes JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// True mu. Defaults to `s_true` from the input.
        #[arg(long)]
        true_mu: Option<f64>,

        /// Newton profiler settings (JSON). Defaults to detached steps.
        #[arg(long)]
        profiler: Option<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate the 3-feature paper toy dataset
    Toy {
        /// Generator settings (JSON); flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Signal events (also background events unless `--background` is set)
        #[arg(long)]
        events: Option<usize>,

        /// Background events
        #[arg(long)]
        background: Option<usize>,

        /// RNG seed
        #[arg(long)]
        seed: Option<u64>,

        /// Background shift of feature 0
        #[arg(long)]
        r: Option<f64>,

        /// Background rate of feature 2
        #[arg(long)]
        lambda: Option<f64>,

        /// Keep signal first, then background
        #[arg(long)]
        no_shuffle: bool,

        /// Evaluation-time shift of background feature 0 (applied after generation)
        #[arg(long, allow_hyphen_values = true)]
        modify_r: Option<f64>,

        /// Evaluation-time background rate of feature 2 (applied after generation)
        #[arg(long)]
        modify_lambda: Option<f64>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Normalized histogram of predictions
    Histogram {
        /// JSON array of values (or of class-probability rows with `--argmax`)
        #[arg(short, long)]
        input: PathBuf,

        /// Bin edges, comma separated
        #[arg(
            long,
            value_delimiter = ',',
            required_unless_present = "argmax",
            conflicts_with = "argmax",
            allow_hyphen_values = true
        )]
        edges: Vec<f64>,

        /// Bin each row by its most probable class
        #[arg(long)]
        argmax: bool,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Scan { input, start, stop, step, threshold, profiler, output } => {
            cmd_scan(&input, start, stop, step, threshold, profiler.as_deref(), output.as_deref())
        }
        Commands::Fisher { input, true_mu, profiler, output } => {
            cmd_fisher(&input, true_mu, profiler.as_deref(), output.as_deref())
        }
        Commands::Toy { config, events, background, seed, r, lambda, no_shuffle, modify_r, modify_lambda, output } => {
            let mut cfg = match config {
                Some(path) => read_json::<ToyConfig>(&path)?,
                None => ToyConfig::default(),
            };
            if let Some(n) = events {
                cfg.n_signal = n;
                cfg.n_background = n;
            }
            if let Some(n) = background {
                cfg.n_background = n;
            }
            if let Some(s) = seed {
                cfg.seed = s;
            }
            if let Some(v) = r {
                cfg.r = v;
            }
            if let Some(v) = lambda {
                cfg.lambda = v;
            }
            if no_shuffle {
                cfg.shuffle = false;
            }
            cmd_toy(&cfg, modify_r, modify_lambda, output.as_deref())
        }
        Commands::Histogram { input, edges, argmax, output } => {
            if argmax {
                cmd_histogram_argmax(&input, output.as_deref())
            } else {
                cmd_histogram(&input, &edges, output.as_deref())
            }
        }
        Commands::Version => {
            println!("inferno {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn load_spec(input: &Path) -> Result<BinnedSpec> {
    tracing::info!(path = %input.display(), "loading binned model");
    let text = std::fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let spec = BinnedSpec::from_json(&text)?;
    tracing::info!(bins = spec.signal.len(), shape_nuisances = spec.background_up.len(), "model loaded");
    Ok(spec)
}

fn load_profiler(path: Option<&Path>) -> Result<NewtonProfiler> {
    let config = match path {
        Some(p) => read_json::<ProfilerConfig>(p)?,
        None => ProfilerConfig { step_graph: StepGraph::Detached, ..Default::default() },
    };
    Ok(NewtonProfiler::new(config)?)
}

fn write_json(output: Option<&Path>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

fn cmd_scan(
    input: &Path,
    start: f64,
    stop: f64,
    step: f64,
    threshold: f64,
    profiler: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let spec = load_spec(input)?;
    let profiler = load_profiler(profiler)?;
    let mu_scan = linspace_step(start, stop, step)?;

    let mut tape = Tape::new();
    let model = spec.build(&mut tape)?;
    let curve = profile_curve(&mut tape, &model, &profiler, &mu_scan)?.to_profile_curve(&tape);

    let width = match likelihood_width_f64(&curve, threshold) {
        Ok(w) => Some(w),
        Err(inferno_core::Error::NoRootsFound { threshold }) => {
            tracing::warn!(threshold, "scan range does not bracket the threshold on both sides");
            None
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(mu_hat = curve.mu_hat(), width, "scan complete");

    let output_json = serde_json::json!({
        "mu": curve.mu,
        "nll": curve.nll,
        "delta_nll": curve.delta_nll(),
        "nuisances": curve.nuisances,
        "mu_hat": curve.mu_hat(),
        "threshold": threshold,
        "width": width,
    });

    write_json(output, output_json)
}

fn cmd_fisher(input: &Path, true_mu: Option<f64>, profiler: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let spec = load_spec(input)?;
    let profiler = load_profiler(profiler)?;
    let true_mu = true_mu.unwrap_or(spec.s_true);
    let names = spec.objective()?.parameter_names();

    let mut tape = Tape::new();
    let model = spec.build(&mut tape)?;
    let result = fisher(&mut tape, &model, &profiler, true_mu)?.to_result(&tape);
    tracing::info!(sigma_mu = result.poi_uncertainty(), nll = result.nll, "fisher complete");

    let output_json = serde_json::json!({
        "parameter_names": names,
        "true_mu": true_mu,
        "parameters": result.parameters,
        "poi_index": result.poi_index,
        "nll": result.nll,
        "hessian": result.hessian,
        "covariance": result.covariance,
        "poi_variance": result.poi_variance(),
        "sigma_mu": result.poi_uncertainty(),
    });

    write_json(output, output_json)
}

fn cmd_toy(config: &ToyConfig, modify_r: Option<f64>, modify_lambda: Option<f64>, output: Option<&Path>) -> Result<()> {
    let mut data = generate(config)?;
    tracing::info!(events = data.len(), seed = config.seed, "toy dataset generated");
    if modify_r.is_some() || modify_lambda.is_some() {
        let r = modify_r.unwrap_or(0.0);
        let lambda = modify_lambda.unwrap_or(config.lambda);
        let syst = PaperSystematics { lambda_nominal: config.lambda, ..Default::default() };
        data = syst.modify_background(&data, r, lambda)?;
        tracing::info!(r, lambda, "background modified");
    }
    write_json(output, serde_json::to_value(&data)?)
}

fn cmd_histogram(input: &Path, edges: &[f64], output: Option<&Path>) -> Result<()> {
    let values: Vec<f64> = read_json(input)?;
    let fractions = bin_hard(&values, edges)?;
    let output_json = serde_json::json!({
        "edges": edges,
        "fractions": fractions,
        "n_values": values.len(),
    });
    write_json(output, output_json)
}

fn cmd_histogram_argmax(input: &Path, output: Option<&Path>) -> Result<()> {
    let probs: Vec<Vec<f64>> = read_json(input)?;
    let fractions = argmax_shape(&probs)?;
    let output_json = serde_json::json!({
        "fractions": fractions,
        "n_values": probs.len(),
    });
    write_json(output, output_json)
}
