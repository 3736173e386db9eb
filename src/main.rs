//! Command line driver of the Compton coincidence analysis
//!
//! Each subcommand runs one stage of the pipeline, see the library
//! documentation for what they compute.

use clap::{Parser, Subcommand};
use compton_coincidence::{analysis, config::Configuration, Result};
use eyre::WrapErr;
use std::{fs, path::PathBuf, time::Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "compton_coincidence")]
#[command(about = "Analysis of a two-detector Compton scattering experiment")]
#[command(version)]
struct Cli {
    /// JSON configuration file, built-in defaults are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the `.fast` data files
    #[arg(short, long, global = true, default_value = ".")]
    data_dir: PathBuf,

    /// Directory where the result tables are written
    #[arg(short, long, global = true, default_value = "results")]
    output_dir: PathBuf,

    /// Log more (once for debug, twice for trace), RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Calibrate both detectors from the source runs
    Calibrate,

    /// Fit the photo-peak efficiency and tabulate its uncertainty
    Efficiency,

    /// Build the detector response matrices from the source runs
    Response,

    /// Write the coincidence histogram of every angle
    Histogram,

    /// Fit the coincidence peak of every angle
    Fit,

    /// Tabulate the self-absorption probability of the scatterer
    Absorption,

    /// Compare the fit results with the Klein-Nishina expectations
    Theory,
}

/// Set up logging, `-v` raising the default level
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // ### CONFIGURATION READOUT ###
    let config = match &cli.config {
        Some(path) => Configuration::load(path).wrap_err("Failed to load the configuration")?,
        None => {
            let config = Configuration::default();
            config.print();
            config
        }
    };
    fs::create_dir_all(&cli.output_dir).wrap_err_with(|| {
        format!("Failed to create output directory {}", cli.output_dir.display())
    })?;

    // ### ANALYSIS ###
    let saved_time = Instant::now();
    let (data_dir, output_dir) = (cli.data_dir.as_path(), cli.output_dir.as_path());
    match cli.command {
        Command::Calibrate => {
            analysis::calibrate(&config, data_dir, output_dir)?;
        }
        Command::Efficiency => {
            analysis::efficiency(&config, data_dir, output_dir)?;
        }
        Command::Response => analysis::response(&config, data_dir, output_dir)?,
        Command::Histogram => {
            let angles = analysis::histogram(&config, data_dir, output_dir)?;
            info!("Wrote {angles} coincidence histograms");
        }
        Command::Fit => {
            let rows = analysis::fit(&config, data_dir, output_dir)?;
            info!("Wrote {} fit results", rows.len());
        }
        Command::Absorption => {
            analysis::absorption(&config, output_dir)?;
        }
        Command::Theory => {
            analysis::theory(&config, output_dir)?;
        }
    }

    // ...and we're done
    info!(
        "Done in {:.1} s, results are in {}",
        saved_time.elapsed().as_secs_f64(),
        output_dir.display()
    );
    Ok(())
}
