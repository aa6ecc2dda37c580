//! Polarization stabilizer
//!
//! Runs the coordinate-descent controller against the simulated bench and
//! reports the final state. Configuration comes from the command line or from
//! a JSON file written earlier with `--save-config`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use hardware::sim::{SimConfig, SimulatedBench};
use stabilizer::{
    CsvMeasurementLog, MeasurementLog, NullLog, RunOutcome, StabilizationController,
    StabilizerArgs, StabilizerConfig,
};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Polarization stabilizer
#[derive(Parser, Debug)]
#[command(name = "stabilize")]
#[command(
    about = "Drive a 4-channel piezo polarization controller onto a target state",
    long_about = "Closed-loop polarization stabilizer using coordinate descent.\n\n\
        Each round:\n  \
        1. Reads a baseline from the polarimeter\n  \
        2. Tries every channel at code+step and code-step\n  \
        3. Keeps any trial that strictly improves the distance to the target\n  \
        4. Re-asserts the accepted codes and takes one round reading\n\n\
        The step size moves from coarse to fine as the round distance drops below \
        each level's promote threshold. The run ends when the distance is below the \
        stop threshold or the round budget is spent."
)]
struct Args {
    #[arg(
        long,
        help = "Load configuration from a JSON file",
        long_help = "Load the stabilizer configuration from a JSON file. When given, the \
            stabilizer flags below are ignored. Missing fields take their defaults."
    )]
    config: Option<PathBuf>,

    #[arg(long, help = "Write the effective configuration to a JSON file")]
    save_config: Option<PathBuf>,

    #[arg(
        long,
        default_value = "30.0",
        allow_hyphen_values = true,
        help = "Simulated input azimuth in degrees"
    )]
    input_azimuth_deg: f64,

    #[arg(
        long,
        default_value = "10.0",
        allow_hyphen_values = true,
        help = "Simulated input ellipticity in degrees"
    )]
    input_ellipticity_deg: f64,

    #[arg(
        long,
        default_value = "0.0",
        help = "Gaussian noise on simulated angles, in degrees"
    )]
    noise_deg: f64,

    #[arg(long, help = "Seed for the simulated noise")]
    seed: Option<u64>,

    #[arg(long, default_value = "0.98", help = "Simulated degree of polarization")]
    sim_dop: f64,

    #[arg(
        long,
        default_value = "2048.0",
        help = "DAC codes per full wave of retardance",
        long_help = "Number of DAC codes that produce one full wave (2π) of retardance in each \
            simulated fiber squeezer."
    )]
    codes_per_wave: f64,

    #[command(flatten)]
    stabilizer: StabilizerArgs,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();
}

fn open_log(config: &StabilizerConfig) -> Result<Box<dyn MeasurementLog>> {
    match &config.log_path {
        Some(path) => {
            let log = CsvMeasurementLog::create(path)
                .with_context(|| format!("Failed to open measurement log {}", path.display()))?;
            Ok(Box::new(log))
        }
        None => Ok(Box::new(NullLog)),
    }
}

fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => StabilizerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => args.stabilizer.clone().into_config()?,
    };

    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("Failed to save config {}", path.display()))?;
        info!("Saved configuration to {}", path.display());
    }

    info!("Polarization Stabilizer");
    info!("=======================");
    info!(
        "Target:        psi={:.3}° chi={:.3}°",
        config.target.azimuth_deg, config.target.ellipticity_deg
    );
    info!(
        "Steps:         {:?}",
        config
            .step_schedule
            .levels()
            .iter()
            .map(|level| level.step)
            .collect::<Vec<_>>()
    );
    info!("Stop:          {:.3}°", config.stop_threshold_deg);
    info!("Settle:        {:.3} s", config.settle_s);
    info!("Max rounds:    {}", config.max_rounds);
    if let Some(path) = &config.log_path {
        info!("Log:           {}", path.display());
    }

    let bench = SimulatedBench::open(SimConfig {
        input_azimuth_deg: args.input_azimuth_deg,
        input_ellipticity_deg: args.input_ellipticity_deg,
        dop: args.sim_dop,
        codes_per_wave: args.codes_per_wave,
        noise_deg: args.noise_deg,
        seed: args.seed,
        bounds: config.bounds,
        ..SimConfig::default()
    });

    let log = open_log(&config)?;
    let mut controller =
        StabilizationController::new(bench.actuator(), bench.polarimeter(), log, config)?;

    let result = controller.run()?;

    info!("Result:        {:?}", result.outcome);
    info!("Rounds:        {}", result.rounds);
    info!("Distance:      {:.4}°", result.final_distance_deg);
    info!(
        "Measured:      dop={:.4} psi={:.3}° chi={:.3}°",
        result.final_measurement.dop,
        result.final_measurement.azimuth_deg,
        result.final_measurement.ellipticity_deg
    );
    info!("Codes:         {:?}", result.final_codes);
    info!("Step level:    {}", result.final_step_index);

    if result.outcome == RunOutcome::Exhausted {
        warn!("Did not converge within the round budget");
    }

    bench.close();
    Ok(())
}
