use clap::{Parser, Subcommand};
use log::{error, info};
use std::process::ExitCode;
use std::time::Duration;

use spid_tracker::astro::ObserverSite;
use spid_tracker::config::Config;
use spid_tracker::rotator::sim::SimulatedRotator;
use spid_tracker::rotator::{Rotator, RotatorPosition, Transport};
use spid_tracker::tracker::{target_from_parts, Tracker, TrackerState};

#[derive(Parser)]
#[command(name = "spid-tracker")]
#[command(about = "SPID Rot2Prog rotator control and sidereal tracking")]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<String>,
    /// Serial port, overrides the configuration
    #[arg(long, global = true)]
    port: Option<String>,
    /// Talk to a simulated rotator instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the rotator's current position
    Position,
    /// Start a slew to azimuth and elevation, in degrees
    Goto {
        #[arg(allow_negative_numbers = true)]
        azimuth: f64,
        #[arg(allow_negative_numbers = true)]
        elevation: f64,
    },
    /// Halt the rotator
    Stop,
    /// Follow a point on the sky until interrupted
    Track {
        /// Right ascension in degrees
        #[arg(long, allow_negative_numbers = true)]
        ra: Option<f64>,
        /// Declination in degrees
        #[arg(long, allow_negative_numbers = true)]
        dec: Option<f64>,
        /// Site latitude in degrees, overrides the configured station
        #[arg(long, allow_negative_numbers = true, requires = "lon")]
        lat: Option<f64>,
        /// Site longitude in degrees, east positive
        #[arg(long, allow_negative_numbers = true, requires = "lat")]
        lon: Option<f64>,
        /// Site height above the ellipsoid in metres
        #[arg(long, allow_negative_numbers = true)]
        height: Option<f64>,
    },
    /// Check a configuration file
    ValidateConfig,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match cli.config.as_deref().map(Config::from_file).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = &cli.port {
        config.rotator.port = port.clone();
    }

    if let Commands::ValidateConfig = cli.command {
        return validate_config(&config);
    }

    if cli.simulate {
        info!("Using simulated rotator");
        let sim =
            SimulatedRotator::with_codec(config.rotator.codec(), RotatorPosition::new(0.0, 0.0));
        let rotator = Rotator::new(
            sim.port(),
            config.rotator.codec(),
            config.rotator.timeout,
            config.rotator.poll_retries,
        );
        return execute(&cli, &config, rotator);
    }

    match Rotator::open(&config.rotator) {
        Ok(rotator) => execute(&cli, &config, rotator),
        Err(e) => {
            eprintln!("Error opening rotator on {}: {}", config.rotator.port, e);
            ExitCode::FAILURE
        }
    }
}

fn execute<T: Transport + 'static>(
    cli: &Cli,
    config: &Config,
    mut rotator: Rotator<T>,
) -> ExitCode {
    match &cli.command {
        Commands::Position => match rotator.get_position() {
            Ok(pos) => {
                rotator.release();
                if cli.json {
                    print_json(&pos);
                } else {
                    println!("az {:.1} el {:.1}", pos.azimuth_deg, pos.elevation_deg);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                rotator.release();
                eprintln!("Error reading position: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Goto { azimuth, elevation } => match rotator.go_to(*azimuth, *elevation) {
            Ok(()) => {
                rotator.release();
                println!("Slewing to az {:.1} el {:.1}", azimuth, elevation);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error commanding move: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Stop => match rotator.end() {
            Ok(()) => {
                println!("Rotator stopped");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error stopping rotator: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Track {
            ra,
            dec,
            lat,
            lon,
            height,
        } => {
            let site = match (lat, lon) {
                (Some(lat), Some(lon)) => {
                    let height = height
                        .or_else(|| config.station.as_ref().map(|s| s.altitude_m))
                        .unwrap_or(0.0);
                    match ObserverSite::checked(*lat, *lon, height) {
                        Some(site) => site,
                        None => {
                            eprintln!("Invalid site: lat {}, lon {}, height {}", lat, lon, height);
                            return ExitCode::FAILURE;
                        }
                    }
                }
                _ => match config.site() {
                    Ok(Some(site)) => site,
                    Ok(None) => {
                        eprintln!("No station configured; pass --lat and --lon");
                        return ExitCode::FAILURE;
                    }
                    Err(e) => {
                        eprintln!("Config error: {}", e);
                        return ExitCode::FAILURE;
                    }
                },
            };

            let target = match target_from_parts(*ra, *dec) {
                Ok(target) => target,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            };

            let tracker = match Tracker::new(rotator, site, target, config.tracker.clone()) {
                Ok(tracker) => tracker,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            };

            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("Error starting runtime: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            runtime.block_on(track(tracker, config.tracker.cadence, cli.json))
        }
        Commands::ValidateConfig => validate_config(config),
    }
}

async fn track<T: Transport + 'static>(
    mut tracker: Tracker<T>,
    cadence: Duration,
    json: bool,
) -> ExitCode {
    if let Err(e) = tracker.start() {
        eprintln!("Error starting tracker: {}", e);
        return ExitCode::FAILURE;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interval = tokio::time::interval(cadence);

    let code = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping rotator");
                break ExitCode::SUCCESS;
            }
            _ = interval.tick() => {
                if tracker.state() == TrackerState::Stopped {
                    error!("Tracker stopped after repeated rotator faults");
                    break ExitCode::FAILURE;
                }
                print_status(&tracker, json);
            }
        }
    };

    if let Err(e) = tracker.end().await {
        eprintln!("Error ending tracker: {}", e);
        return ExitCode::FAILURE;
    }
    code
}

fn print_status<T: Transport + 'static>(tracker: &Tracker<T>, json: bool) {
    let status = tracker.status();
    if json {
        print_json(&status);
        return;
    }

    let Some(pos) = status.last_known_position else {
        println!("waiting for first position");
        return;
    };
    let mut line = format!("az {:.1} el {:.1}", pos.azimuth_deg, pos.elevation_deg);
    if let Some(eq) = tracker.current_ra_dec() {
        line.push_str(&format!(" | ra {:.3} dec {:.3}", eq.ra_deg, eq.dec_deg));
    }
    if let Some(gal) = tracker.current_galactic() {
        line.push_str(&format!(" | l {:.2} b {:.2}", gal.l_deg, gal.b_deg));
    }
    if let Some(target) = status.target_alt_az {
        line.push_str(&format!(
            " | target alt {:.2} az {:.2}",
            target.alt_deg, target.az_deg
        ));
        if status.below_horizon {
            line.push_str(" (below limit)");
        } else if status.on_source {
            line.push_str(" (on source)");
        }
    }
    println!("{}", line);
}

fn print_json<S: serde::Serialize>(value: &S) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Error encoding JSON: {}", e),
    }
}

fn validate_config(config: &Config) -> ExitCode {
    let mut ok = true;

    match config.site() {
        Ok(Some(site)) => println!(
            "Station: {} ({:.4}, {:.4}, {:.0} m)",
            config
                .station
                .as_ref()
                .and_then(|s| s.name.as_deref())
                .unwrap_or("unnamed"),
            site.latitude_deg,
            site.longitude_deg,
            site.height_m
        ),
        Ok(None) => println!("Station: none (track needs --lat and --lon)"),
        Err(e) => {
            eprintln!("Config error: {}", e);
            ok = false;
        }
    }

    println!(
        "Rotator: {} at {} baud, timeout {}, {} pulse(s)/deg",
        config.rotator.port,
        config.rotator.baud_rate,
        humantime::format_duration(config.rotator.timeout),
        config.rotator.pulses_per_degree
    );

    match config.tracker.validate() {
        Ok(()) => println!(
            "Tracker: cadence {}, tolerance {} deg, fail-safe after {} faults",
            humantime::format_duration(config.tracker.cadence),
            config.tracker.tolerance_deg,
            config.tracker.max_consecutive_failures
        ),
        Err(e) => {
            eprintln!("Config error: {}", e);
            ok = false;
        }
    }

    if ok {
        println!("Config is valid");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
