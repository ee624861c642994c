//! SO-101 arm bridge CLI.
//!
//! Provides four modes of operation:
//! - `bridge`: Read observer messages from stdin, write commands to stdout
//! - `solve`: Run one solve toward a Cartesian target and print the command
//! - `pose`: Resolve one set of observed arm keypoints and print the command
//! - `info`: Print the arm model and solver settings

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use clap::{Parser, Subcommand};
use nalgebra::Vector3;

use soarm_bridge::{JointCommand, Keypoint, KeypointParams, KeypointSet, Request, Session};
use soarm_core::config::ArmConfig;
use soarm_core::error::{ConfigError, SoArmError};
use soarm_core::time::MonoTime;
use soarm_ik::presets::{so101, so101_solver_config};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Pose-driven controller bridge for the SO-101 arm.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read observer messages from stdin and write commands to stdout.
    Bridge,

    /// Run one solve toward a Cartesian target and print the command.
    Solve {
        /// Target position in metres.
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true, required = true)]
        target: Vec<f64>,
    },

    /// Resolve one set of observed arm keypoints and print the command.
    Pose {
        /// Shoulder keypoint in metres.
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true, required = true)]
        shoulder: Vec<f64>,

        /// Elbow keypoint in metres.
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true, required = true)]
        elbow: Vec<f64>,

        /// Wrist keypoint in metres.
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true, required = true)]
        wrist: Vec<f64>,

        /// Hand keypoint in metres.
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true, required = true)]
        hand: Vec<f64>,
    },

    /// Print the arm model and solver settings.
    Info,
}

fn load_config(path: Option<&PathBuf>) -> Result<ArmConfig, ConfigError> {
    match path {
        Some(path) => ArmConfig::from_file(path),
        None => Ok(ArmConfig {
            solver: so101_solver_config(),
            ..ArmConfig::default()
        }),
    }
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn run_bridge(config: ArmConfig) -> Result<(), SoArmError> {
    let mut session = Session::new(so101(), config)?;
    let start = Instant::now();
    let mut stdout = io::stdout().lock();

    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                eprintln!("stdin closed: {err}");
                break;
            }
        };
        let now = MonoTime::from_duration(start.elapsed());
        if let Some(out) = session.process_line(&line, now, Utc::now()) {
            if writeln!(stdout, "{out}").and_then(|()| stdout.flush()).is_err() {
                break;
            }
        }
    }
    Ok(())
}

fn run_solve(config: ArmConfig, target: &[f64]) -> Result<(), SoArmError> {
    let mut session = Session::new(so101(), config)?;
    let position = Vector3::new(target[0], target[1], target[2]);
    let result = session.solve_target(position, MonoTime::new())?;

    if result.accepted() {
        eprintln!(
            "accepted: status={:?}, iterations={}, residual={:.6}, max_distance={:.6}",
            result.status, result.iterations, result.residual, result.max_distance
        );
        print_command(&session.command(Utc::now()));
    } else {
        eprintln!(
            "rejected: status={:?}, max_distance={:.6}",
            result.status, result.max_distance
        );
    }
    Ok(())
}

fn run_pose(
    config: ArmConfig,
    shoulder: &[f64],
    elbow: &[f64],
    wrist: &[f64],
    hand: &[f64],
) -> Result<(), SoArmError> {
    let mut session = Session::new(so101(), config)?;
    let request = Request::SetJointsFromArmPose {
        timestamp: None,
        params: KeypointParams {
            joints: KeypointSet {
                shoulder: Some(keypoint(shoulder)),
                elbow: Some(keypoint(elbow)),
                wrist: Some(keypoint(wrist)),
                hand: Some(keypoint(hand)),
            },
        },
    };

    match session.process(&request, MonoTime::new(), Utc::now())? {
        Some(command) => print_command(&command),
        None => eprintln!("keypoints rejected, no command produced"),
    }
    Ok(())
}

fn run_info(config: ArmConfig) -> Result<(), SoArmError> {
    let scheduler = config.scheduler.clone();
    let session = Session::new(so101(), config)?;
    let chain = session.chain();
    let solver = session.solver_config();

    println!("soarm v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("joints:");
    for joint in chain.joints() {
        println!(
            "  {:<14} axis={} limits=[{:.1}, {:.1}] deg",
            joint.name,
            joint.axis,
            joint.lower_limit.to_degrees(),
            joint.upper_limit.to_degrees()
        );
    }
    println!();
    println!("control points:");
    for point in chain.control_points() {
        println!("  {:<14} joint={}", point.name, point.joint);
    }
    println!();
    println!("solver:");
    println!("  ee_point              {}", solver.ee_point);
    println!("  max_iterations        {}", solver.max_iterations);
    println!("  position_tolerance    {:e}", solver.position_tolerance);
    println!("  damping               {:e}", solver.damping);
    println!("  acceptance_threshold  {} m", solver.acceptance_threshold);
    println!();
    println!("scheduler:");
    println!("  min_solve_interval    {} ms", scheduler.min_solve_interval_ms);
    println!("  moderate_gap          {} ms", scheduler.moderate_gap_ms);
    println!("  long_gap              {} ms", scheduler.long_gap_ms);
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn keypoint(values: &[f64]) -> Keypoint {
    Keypoint::new(values[0], values[1], values[2])
}

fn print_command(command: &JointCommand) {
    match serde_json::to_string_pretty(command) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to serialise command: {err}"),
    }
}

fn main() {
    // Logs go to stderr so the bridge's stdout stays a clean command stream.
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Solve { target }) => run_solve(config, &target),
        Some(Commands::Pose {
            shoulder,
            elbow,
            wrist,
            hand,
        }) => run_pose(config, &shoulder, &elbow, &wrist, &hand),
        Some(Commands::Info) => run_info(config),
        Some(Commands::Bridge) | None => run_bridge(config),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
