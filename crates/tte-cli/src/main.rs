//! ttelike CLI

mod config;
mod model;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tte_core::Plugin;
use tte_events::{LightCurveOptions, TimeSeries};
use tte_like::TteLike;

use config::AnalysisConfig;
use model::ModelSpec;

#[derive(Parser)]
#[command(name = "ttelike")]
#[command(about = "ttelike - time-tagged event binning, background fits and likelihoods")]
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
    /// Create time bins from the config's `binning` block and print them
    Bins {
        /// Analysis config (YAML, or JSON by extension)
        #[arg(short, long)]
        config: PathBuf,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write one PHA file per time bin
    Pha {
        /// Analysis config (YAML, or JSON by extension)
        #[arg(short, long)]
        config: PathBuf,

        /// Output basename; files are `<basename>_<i>.pha.parquet`
        #[arg(short, long)]
        basename: PathBuf,

        /// Replace existing files
        #[arg(long)]
        overwrite: bool,
    },

    /// Light curve of a channel selection with the background rate
    Lightcurve {
        /// Analysis config (YAML, or JSON by extension)
        #[arg(short, long)]
        config: PathBuf,

        /// Start time (s); defaults to the observation start
        #[arg(long, allow_negative_numbers = true)]
        start: Option<f64>,

        /// Stop time (s); defaults to the observation stop
        #[arg(long, allow_negative_numbers = true)]
        stop: Option<f64>,

        /// Bin width (s)
        #[arg(long, default_value = "1.0")]
        dt: f64,

        /// Use the config's time bins instead of a regular grid
        #[arg(long)]
        use_binner: bool,

        /// Channel or energy selection (defaults to the config's)
        #[arg(long)]
        channels: Option<String>,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fit the background and print the per-channel polynomials
    Background {
        /// Analysis config (YAML, or JSON by extension)
        #[arg(short, long)]
        config: PathBuf,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Log-likelihood of a spectral model for the active interval
    Likelihood {
        /// Analysis config (YAML, or JSON by extension); needs `response`
        #[arg(short, long)]
        config: PathBuf,

        /// Spectral model JSON, e.g. {"type": "powerlaw", "k": 0.01, "index": -1.5}
        #[arg(short, long)]
        model: PathBuf,

        /// Profile the effective-area correction
        #[arg(long)]
        free_effective_area: bool,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Bins { config, output } => cmd_bins(&config, output.as_deref()),
        Commands::Pha { config, basename, overwrite } => cmd_pha(&config, &basename, overwrite),
        Commands::Lightcurve { config, start, stop, dt, use_binner, channels, output } => {
            let options = LightCurveOptions { start, stop, dt, use_binner, channels };
            cmd_lightcurve(&config, &options, output.as_deref())
        }
        Commands::Background { config, output } => cmd_background(&config, output.as_deref()),
        Commands::Likelihood { config, model, free_effective_area, output } => {
            cmd_likelihood(&config, &model, free_effective_area, output.as_deref())
        }
    }
}

fn write_json(output: Option<&Path>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

/// Load the config and create the time bins it asks for.
fn binned_series(path: &Path) -> Result<TimeSeries> {
    let config = AnalysisConfig::read(path)?;
    let mut series = config.time_series()?;
    let binning = config.binning.as_ref().context("config has no `binning` block")?;
    let method = binning.method()?;
    let bins = series.create_time_bins(binning.start, binning.stop, method)?;
    tracing::info!(method = %method, bins = bins.len(), "time bins created");
    Ok(series)
}

fn cmd_bins(config: &Path, output: Option<&Path>) -> Result<()> {
    let mut series = binned_series(config)?;
    let detector = series.detector().to_string();
    let mask = series.store().channel_selection().mask().to_vec();
    let bins = series.bins()?;
    let rows: Vec<serde_json::Value> = bins
        .bins()
        .iter()
        .map(|b| {
            json!({
                "start": b.interval.start(),
                "stop": b.interval.stop(),
                "counts": b.selected_counts(&mask),
                "exposure": b.exposure,
            })
        })
        .collect();
    write_json(
        output,
        json!({
            "detector": detector,
            "method": bins.method(),
            "n_bins": rows.len(),
            "bins": rows,
        }),
    )
}

fn cmd_pha(config: &Path, basename: &Path, overwrite: bool) -> Result<()> {
    let mut series = binned_series(config)?;
    let paths = series.write_pha_from_binner(basename, overwrite)?;
    for path in &paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_lightcurve(config: &Path, options: &LightCurveOptions, output: Option<&Path>) -> Result<()> {
    let mut series = if options.use_binner {
        binned_series(config)?
    } else {
        AnalysisConfig::read(config)?.time_series()?
    };
    let lc = series.view_lightcurve(options)?;
    write_json(output, serde_json::to_value(&lc)?)
}

fn cmd_background(config: &Path, output: Option<&Path>) -> Result<()> {
    let config = AnalysisConfig::read(config)?;
    let mut series = config.time_series()?;
    let model = series.background()?;
    let detector = &config.detector;
    let channels: Vec<serde_json::Value> = model
        .polynomials()
        .iter()
        .enumerate()
        .map(|(c, p)| {
            json!({
                "channel": c,
                "time_scale": p.scale(),
                "coefficients": p.coefficients(),
                "errors": p.coefficient_errors(),
            })
        })
        .collect();
    write_json(
        output,
        json!({
            "detector": detector,
            "order": model.order(),
            "unbinned": model.is_unbinned(),
            "intervals": model.intervals().to_spec(),
            "channels": channels,
        }),
    )
}

fn cmd_likelihood(config: &Path, model: &Path, free_effective_area: bool, output: Option<&Path>) -> Result<()> {
    let config = AnalysisConfig::read(config)?;
    let response = config.response()?;
    let series = config.time_series()?;
    let mut plugin = TteLike::new(config.detector.clone(), series, response)?;

    let bytes = std::fs::read(model).with_context(|| format!("reading {}", model.display()))?;
    let spec: ModelSpec = serde_json::from_slice(&bytes)?;
    plugin.set_model(Arc::new(spec))?;

    let log_likelihood = if free_effective_area {
        plugin.free_effective_area_correction()?;
        plugin.inner_fit()?
    } else {
        plugin.log_likelihood()?
    };
    tracing::info!(log_likelihood, "likelihood evaluated");

    write_json(
        output,
        json!({
            "name": plugin.name(),
            "log_likelihood": log_likelihood,
            "n_data_points": plugin.n_data_points(),
            "nuisance_parameters": plugin.nuisance_parameters(),
        }),
    )
}
