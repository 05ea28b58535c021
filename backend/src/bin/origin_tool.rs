//! Operator CLI for the Origin bridge.
//!
//! Subcommands cover the command surface end to end:
//! - `status`: poll briefly and print the snapshot
//! - `watch`: poll forever, reprinting on every status change
//! - `goto` / `sync`: equatorial pointing
//! - `park` / `unpark` / `tracking`: mount state
//! - `capture`: run one exposure and write the image to disk
//! - `abort`: stop axis motion

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use origin_backend::session::{Event, Session};
use origin_backend::ExposurePhase;
use tracing::info;

/// Default telescope address on its own access point.
const DEFAULT_HOST: &str = "192.168.1.169";

/// Poll cadence while waiting on the telescope.
const POLL_PERIOD: Duration = Duration::from_millis(250);

/// Celestron Origin control tool
#[derive(Parser, Debug)]
#[command(name = "origin_tool")]
#[command(about = "Command-line control for the Celestron Origin telescope")]
#[command(version)]
struct Args {
    /// Telescope host
    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    host: String,

    /// Control channel port
    #[arg(long, global = true, default_value_t = 80)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll briefly and print the status snapshot
    Status,

    /// Poll forever, reprinting the snapshot on every change
    Watch,

    /// Slew to an equatorial position
    Goto {
        /// Right ascension in hours (0-24)
        ra: f64,
        /// Declination in degrees (-90 to 90)
        dec: f64,
        /// Keep polling until the slew finishes
        #[arg(long)]
        wait: bool,
    },

    /// Sync the mount to an equatorial position
    Sync {
        /// Right ascension in hours (0-24)
        ra: f64,
        /// Declination in degrees (-90 to 90)
        dec: f64,
    },

    /// Park the mount
    Park,

    /// Unpark the mount
    Unpark,

    /// Enable or disable sidereal tracking
    Tracking {
        /// "on" or "off"
        state: String,
    },

    /// Run one exposure and save the image
    Capture {
        /// Exposure length in seconds
        #[arg(short, long, default_value_t = 1.0)]
        exposure: f64,

        /// Sensor sensitivity
        #[arg(long, default_value_t = 200)]
        iso: u32,

        /// Output file
        #[arg(short, long, default_value = "capture.tiff")]
        output: PathBuf,

        /// Give up after this many seconds past the exposure itself
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },

    /// Stop all axis motion
    Abort,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut session = Session::new();
    session.connect(&args.host, args.port)?;

    match args.command {
        Command::Status => {
            settle(&mut session, Duration::from_secs(2));
            print_snapshot(&session);
        }

        Command::Watch => {
            let events = session.events();
            print_snapshot(&session);
            loop {
                session.poll();
                while let Ok(event) = events.try_recv() {
                    if matches!(event, Event::StatusChanged) {
                        print_snapshot(&session);
                    }
                }
                thread::sleep(POLL_PERIOD);
            }
        }

        Command::Goto { ra, dec, wait } => {
            session.goto(ra, dec)?;
            info!("slewing to RA {ra:.4} h, Dec {dec:.4}°");
            if wait {
                // Give the mount a moment to report the slew before
                // watching for it to clear.
                settle(&mut session, Duration::from_secs(2));
                while session.snapshot().is_slewing {
                    session.poll();
                    thread::sleep(POLL_PERIOD);
                }
                info!("slew complete");
            }
        }

        Command::Sync { ra, dec } => {
            session.sync_to(ra, dec)?;
            info!("synced to RA {ra:.4} h, Dec {dec:.4}°");
        }

        Command::Park => session.park()?,
        Command::Unpark => session.unpark()?,

        Command::Tracking { state } => {
            let enabled = match state.as_str() {
                "on" => true,
                "off" => false,
                other => bail!("tracking state must be \"on\" or \"off\", got {other:?}"),
            };
            session.set_tracking(enabled)?;
        }

        Command::Capture {
            exposure,
            iso,
            output,
            timeout,
        } => {
            let events = session.events();
            session.start_exposure(exposure, iso)?;
            info!("started {exposure:.2} s exposure at ISO {iso}");

            let deadline =
                std::time::Instant::now() + Duration::from_secs_f64(exposure) + Duration::from_secs(timeout);
            loop {
                session.poll();
                if let Some(left) = session.exposure_remaining() {
                    info!("{:.1} s remaining", left.as_secs_f64());
                }
                match events.try_recv() {
                    Ok(Event::ExposureComplete { data, file, .. }) => {
                        std::fs::write(&output, &data)?;
                        info!(
                            "wrote {} bytes from {file} to {}",
                            data.len(),
                            output.display()
                        );
                        break;
                    }
                    Ok(Event::ExposureFailed { error }) => bail!("exposure failed: {error}"),
                    _ => {}
                }
                if std::time::Instant::now() > deadline {
                    let phase = session.exposure_phase();
                    session.abort_exposure();
                    bail!("gave up waiting for image (phase was {phase:?})");
                }
                thread::sleep(POLL_PERIOD);
            }
        }

        Command::Abort => session.abort_motion()?,
    }

    session.disconnect();
    Ok(())
}

/// Poll for a fixed settle period so deltas arrive before we act on them.
fn settle(session: &mut Session, period: Duration) {
    let deadline = std::time::Instant::now() + period;
    while std::time::Instant::now() < deadline {
        session.poll();
        thread::sleep(POLL_PERIOD);
    }
}

fn print_snapshot(session: &Session) {
    let s = session.snapshot();
    println!(
        "RA {:.4} h  Dec {:+.4}°  Alt {:.2}°  Az {:.2}°",
        s.ra_hours, s.dec_degrees, s.alt_degrees, s.az_degrees
    );
    println!(
        "tracking={} slewing={} parked={} aligned={}  op={:?}  temp={:.1} °C",
        s.is_tracking,
        s.is_slewing,
        s.is_parked,
        s.is_aligned,
        s.current_operation,
        s.temperature_celsius
    );
    if session.exposure_phase() != ExposurePhase::Idle {
        println!("exposure: {:?}", session.exposure_phase());
    }
}
