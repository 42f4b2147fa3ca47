//! PFLOCALIZE SIM: run and analyze the landmark particle filter on trajectory logs.
//!
//! The program has three commands:
//!
//! - `run`: play one trajectory log, or every log in a directory, through the particle filter and write a results
//!   CSV per log.
//! - `generate`: write a synthetic straight-line trajectory log observing the configured landmarks.
//! - `config`: write a template configuration file (TOML/JSON/YAML).
//!
//! Every parameter can come from a configuration file passed with `--config`; command-line flags override the
//! values it contains.

mod common;
#[cfg(feature = "plotting")]
mod plotting;

use clap::{Args, Parser, Subcommand};
use common::{
    ensure_parent_dir, get_csv_files, init_logger, results_path, validate_input_path,
    validate_output_path,
};
use log::{error, info, warn};
use pflocalize::particle::DegenerateWeightPolicy;
use pflocalize::sim::{
    SimulationConfig, StepResult, TrajectoryRecord, generate_straight_line, run_localization,
};
use std::error::Error;
use std::path::{Path, PathBuf};

const LONG_ABOUT: &str = "PFLOCALIZE SIM: run and analyze a particle filter for 2D robot localization.

A robot moving in the plane observes the displacement to a fixed set of landmarks. The particle filter estimates its
pose (x, y, heading) from those observations and a unicycle motion model.

Trajectory logs are CSV files with one record per line: timestamp, ground-truth pose [x, y, heading], angular
velocity command and one displacement [dx, dy] per landmark. Bracketed and quoted array fields are accepted.

Parameters are read from a configuration file (TOML/JSON/YAML) given with --config, and individual values can be
overridden with command-line flags.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Particle filter localization against known landmarks.", long_about = LONG_ABOUT)]
struct Cli {
    /// Configuration file (TOML/JSON/YAML) providing the base parameters
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Render ensemble and error plots next to the results (requires the `plotting` feature)
    #[arg(long, global = true)]
    plot: bool,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run the particle filter over trajectory logs",
        long_about = "Run the particle filter over a trajectory log, or over every CSV log in a directory. For each log a results file <stem>_results.csv with the estimate, centroid, ground truth and errors of every step is written to the output directory."
    )]
    Run(RunArgs),

    #[command(
        name = "generate",
        about = "Generate a synthetic straight-line trajectory log",
        long_about = "Generate a trajectory log for a robot driving in a straight line at constant speed with zero angular velocity, observing every configured landmark. Observations can optionally be perturbed by Gaussian noise."
    )]
    Generate(GenerateArgs),

    #[command(name = "config", about = "Write a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Input CSV file or directory containing CSV files
    #[arg(short, long, value_parser)]
    input: PathBuf,

    /// Output directory for results
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Number of particles
    #[arg(short = 'n', long)]
    num_particles: Option<usize>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// What to do when every particle has zero likelihood
    #[arg(long, value_enum)]
    degenerate_policy: Option<DegenerateWeightPolicy>,
}

#[derive(Args, Clone, Debug)]
struct GenerateArgs {
    /// Output CSV file
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Number of records
    #[arg(long)]
    steps: Option<usize>,

    /// Time between records (s)
    #[arg(long)]
    dt: Option<f64>,

    /// Forward speed (m/s)
    #[arg(long)]
    speed: Option<f64>,

    /// Standard deviation of the observation noise (m)
    #[arg(long)]
    noise: Option<f64>,

    /// Random seed for the observation noise
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file; the format follows the extension (.toml, .json, .yaml, .yml)
    #[arg(short, long, value_parser, default_value = "pflocalize.toml")]
    output: PathBuf,
}

/// Load the base configuration, or the defaults when no file is given.
fn load_config(path: Option<&Path>) -> Result<SimulationConfig, Box<dyn Error>> {
    match path {
        Some(path) => {
            let config = SimulationConfig::from_file(path).map_err(|e| {
                format!("Failed to read configuration '{}': {e}", path.display())
            })?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(SimulationConfig::default()),
    }
}

impl RunArgs {
    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(n) = self.num_particles {
            config.filter.num_particles = n;
        }
        if let Some(seed) = self.seed {
            config.filter.seed = seed;
        }
        if let Some(policy) = self.degenerate_policy {
            config.filter.degenerate_policy = policy;
        }
    }
}

impl GenerateArgs {
    fn apply(&self, config: &mut SimulationConfig) {
        let trajectory = &mut config.trajectory;
        if let Some(steps) = self.steps {
            trajectory.steps = steps;
        }
        if let Some(dt) = self.dt {
            trajectory.dt = dt;
        }
        if let Some(speed) = self.speed {
            trajectory.speed = speed;
        }
        if let Some(noise) = self.noise {
            trajectory.observation_noise_std = noise;
        }
        if let Some(seed) = self.seed {
            trajectory.seed = seed;
        }
    }
}

fn process_file(
    input_file: &Path,
    output: &Path,
    config: &SimulationConfig,
    plot: bool,
) -> Result<(), Box<dyn Error>> {
    info!("Processing file: {}", input_file.display());
    let records = TrajectoryRecord::from_csv(input_file, config.landmarks.len())?;
    info!(
        "Read {} records from {}",
        records.len(),
        input_file.display()
    );

    let run = run_localization(&records, config)?;
    let output_file = results_path(output, input_file)?;
    StepResult::to_csv(&run.results, &output_file)?;
    info!("Results written to {}", output_file.display());

    if plot {
        #[cfg(feature = "plotting")]
        write_plots(&run, &records, config, &output_file);
        #[cfg(not(feature = "plotting"))]
        warn!("Plotting requested but pflocalize-sim was built without the `plotting` feature");
    }
    Ok(())
}

/// Plot the first, middle and last ensembles and the error history. Failures are logged, not fatal.
#[cfg(feature = "plotting")]
fn write_plots(
    run: &pflocalize::sim::LocalizationRun,
    records: &[TrajectoryRecord],
    config: &SimulationConfig,
    output_file: &Path,
) {
    let error_plot = output_file.with_extension("png");
    match plotting::plot_errors(&run.results, &error_plot) {
        Ok(()) => info!("Error plot written to {}", error_plot.display()),
        Err(e) => warn!("Failed to generate error plot: {e}"),
    }

    let last = run.history.len().saturating_sub(1);
    let mut steps = vec![0, last / 2, last];
    steps.dedup();
    for step in steps {
        let (Some(particles), Some(record)) = (run.history.get(step), records.get(step)) else {
            continue;
        };
        let path = output_file.with_extension(format!("step{step:04}.png"));
        let title = format!("Particles at t = {:.2} s", record.time);
        match plotting::plot_ensemble(
            particles,
            &config.landmarks,
            &record.ground_truth,
            &title,
            &path,
        ) {
            Ok(()) => info!("Ensemble plot written to {}", path.display()),
            Err(e) => warn!("Failed to generate ensemble plot for step {step}: {e}"),
        }
    }
}

fn run(args: &RunArgs, mut config: SimulationConfig, plot: bool) -> Result<(), Box<dyn Error>> {
    args.apply(&mut config);
    config.record_history |= plot;
    validate_input_path(&args.input)?;
    validate_output_path(&args.output)?;
    let files = get_csv_files(&args.input)?;
    info!(
        "Running {} file(s) with {} particles (seed {})",
        files.len(),
        config.filter.num_particles,
        config.filter.seed
    );

    let mut failures = 0;
    for file in &files {
        if let Err(e) = process_file(file, &args.output, &config, plot) {
            error!("Failed to process {}: {e}", file.display());
            failures += 1;
        }
    }
    if failures > 0 {
        return Err(format!("{failures} of {} file(s) failed", files.len()).into());
    }
    Ok(())
}

fn generate(args: &GenerateArgs, mut config: SimulationConfig) -> Result<(), Box<dyn Error>> {
    args.apply(&mut config);
    let records = generate_straight_line(&config.trajectory, &config.landmark_vectors())?;
    ensure_parent_dir(&args.output)?;
    TrajectoryRecord::to_csv(&records, &args.output)?;
    info!(
        "Wrote {} records to {}",
        records.len(),
        args.output.display()
    );
    Ok(())
}

fn create_config_file(
    args: &CreateConfigArgs,
    config: SimulationConfig,
) -> Result<(), Box<dyn Error>> {
    ensure_parent_dir(&args.output)?;
    config.to_file(&args.output).map_err(|e| {
        format!(
            "Failed to write configuration '{}': {e}",
            args.output.display()
        )
    })?;
    println!("Configuration file created: {}", args.output.display());
    println!("Run the filter with:");
    println!(
        "  pflocalize-sim --config {} run -i <log.csv> -o <results_dir>",
        args.output.display()
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_deref())?;

    let config = load_config(cli.config.as_deref())?;
    let result = match &cli.command {
        Command::Run(args) => run(args, config, cli.plot),
        Command::Generate(args) => generate(args, config),
        Command::CreateConfig(args) => create_config_file(args, config),
    };
    if let Err(e) = &result {
        error!("{e}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cli_parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "pflocalize-sim",
            "--log-level",
            "debug",
            "run",
            "-i",
            "log.csv",
            "-o",
            "out",
            "-n",
            "250",
            "--degenerate-policy",
            "fail",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let mut config = SimulationConfig::default();
        args.apply(&mut config);
        assert_eq!(config.filter.num_particles, 250);
        assert_eq!(config.filter.degenerate_policy, DegenerateWeightPolicy::Fail);
        assert_eq!(config.filter.seed, SimulationConfig::default().filter.seed);
    }

    #[test]
    fn test_cli_requires_a_command() {
        assert!(Cli::try_parse_from(["pflocalize-sim"]).is_err());
    }

    #[test]
    fn test_generate_then_run() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("logs").join("line.csv");
        let out = dir.path().join("results");

        let generate_args = GenerateArgs {
            output: log.clone(),
            steps: Some(40),
            dt: None,
            speed: None,
            noise: None,
            seed: None,
        };
        generate(&generate_args, SimulationConfig::default()).unwrap();
        assert!(log.exists());

        let run_args = RunArgs {
            input: log.parent().unwrap().to_path_buf(),
            output: out.clone(),
            num_particles: Some(50),
            seed: Some(1),
            degenerate_policy: None,
        };
        run(&run_args, SimulationConfig::default(), false).unwrap();
        let results = StepResult::from_csv(out.join("line_results.csv")).unwrap();
        assert_eq!(results.len(), 40);
    }

    #[test]
    fn test_create_config_round_trip() {
        let dir = tempdir().unwrap();
        for name in ["config.toml", "config.json", "config.yaml"] {
            let args = CreateConfigArgs {
                output: dir.path().join(name),
            };
            create_config_file(&args, SimulationConfig::default()).unwrap();
            let read_back = load_config(Some(args.output.as_path())).unwrap();
            assert_eq!(read_back, SimulationConfig::default());
        }
    }

    #[test]
    fn test_load_config_rejects_unknown_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "").unwrap();
        assert!(load_config(Some(path.as_path())).is_err());
    }
}
