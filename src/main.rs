use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use tokio::runtime::Handle;

use run_tracker::config::TrackerConfig;
use run_tracker::fix::LocationFix;
use run_tracker::pace::{format_elapsed, pace};
use run_tracker::replay::{load_fix_log, SteppedReplay};
use run_tracker::runtime::{IntervalClock, ReplayFeed};
use run_tracker::session::{SessionSnapshot, SessionStats, TrackingSession};
use run_tracker::store::{JsonFileStore, SessionStore};

#[derive(Parser, Debug)]
#[command(name = "run_tracker")]
#[command(about = "Replay recorded runs through the live tracker and manage saved runs", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed a recorded fix log (.json or .json.gz) through a tracking session
    Replay {
        #[arg(long)]
        log: PathBuf,

        /// Tracker config JSON (filter noise, tick interval, moving threshold)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Append the finished run to this store
        #[arg(long)]
        store: Option<PathBuf>,

        /// Drive the session with tokio timers instead of stepping by fix timestamps
        #[arg(long, default_value_t = false)]
        realtime: bool,

        /// Playback speed multiplier for --realtime
        #[arg(long, default_value = "1.0")]
        time_scale: f64,

        /// Mark a lap every this many kilometres
        #[arg(long)]
        lap_km: Option<f64>,
    },

    /// List saved runs, newest first
    List {
        #[arg(long, default_value = "runs.json")]
        store: PathBuf,
    },

    /// Delete a saved run
    Delete {
        #[arg(long, default_value = "runs.json")]
        store: PathBuf,

        id: String,
    },

    /// Delete every saved run
    Clear {
        #[arg(long, default_value = "runs.json")]
        store: PathBuf,
    },

    /// Write a saved run as GPX (stdout unless --out is given)
    ExportGpx {
        #[arg(long, default_value = "runs.json")]
        store: PathBuf,

        id: String,

        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Replay {
            log,
            config,
            store,
            realtime,
            time_scale,
            lap_km,
        } => {
            let options = ReplayOptions {
                realtime,
                time_scale,
                lap_km,
            };
            replay(&log, config.as_deref(), store.as_deref(), options).await
        }
        Command::List { store } => list(&store),
        Command::Delete { store, id } => delete(&store, &id),
        Command::Clear { store } => clear(&store),
        Command::ExportGpx { store, id, out } => export_gpx(&store, &id, out.as_deref()),
    }
}

struct ReplayOptions {
    realtime: bool,
    time_scale: f64,
    lap_km: Option<f64>,
}

async fn replay(
    log_path: &Path,
    config_path: Option<&Path>,
    store_path: Option<&Path>,
    options: ReplayOptions,
) -> Result<()> {
    let config = match config_path {
        Some(path) => TrackerConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    let fixes = load_fix_log(log_path).with_context(|| format!("loading {}", log_path.display()))?;

    if let Some(lap_km) = options.lap_km {
        if !(lap_km.is_finite() && lap_km > 0.0) {
            bail!("--lap-km must be a positive number, got {}", lap_km);
        }
    }

    let snapshot = if options.realtime {
        let time_scale = options.time_scale;
        if !(time_scale.is_finite() && time_scale > 0.0) {
            bail!("--time-scale must be a positive number, got {}", time_scale);
        }
        replay_realtime(config, fixes, time_scale, options.lap_km).await?
    } else {
        let mut replay = SteppedReplay::new(config)?;
        if let Some(lap_km) = options.lap_km {
            replay = replay.with_auto_lap_km(lap_km)?;
        }
        replay.run(&fixes, print_stats)
    };

    let Some(snapshot) = snapshot else {
        bail!("session did not finish");
    };
    print_summary(&snapshot);

    if let Some(path) = store_path {
        let mut store = JsonFileStore::open(path)?;
        store
            .append(&snapshot)
            .with_context(|| format!("saving run to {}", path.display()))?;
    }
    Ok(())
}

async fn replay_realtime(
    mut config: TrackerConfig,
    fixes: Vec<LocationFix>,
    time_scale: f64,
    lap_km: Option<f64>,
) -> Result<Option<SessionSnapshot>> {
    // Keep one tick per recorded second when playback is sped up
    config.tick_interval_ms = ((config.tick_interval_ms as f64 / time_scale).round() as u64).max(1);

    let handle = Handle::current();
    let feed = ReplayFeed::new(handle.clone(), fixes).with_time_scale(time_scale);
    let mut exhausted = feed.exhausted();

    let mut session = TrackingSession::new(config, Box::new(feed), Box::new(IntervalClock::new(handle)))?;
    let mut updates = session.watch();
    session.start();
    info!("Replaying in real time at {}x", time_scale);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let stats = updates.borrow_and_update().clone();
                print_stats(&stats);
                if lap_km.is_some_and(|every_km| stats.lap_due(every_km)) {
                    session.lap();
                }
            }
            _ = exhausted.wait_for(|done| *done) => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; finishing run");
                break;
            }
        }
    }

    Ok(session.finish())
}

fn print_stats(stats: &SessionStats) {
    let heading = stats
        .heading_deg
        .map(|h| format!("{:>5.1}°", h))
        .unwrap_or_else(|| "    -".to_string());
    println!(
        "[{}] {:>7.3} km  {:>5.1} km/h  heading {}  pace {}  fixes {}",
        stats.elapsed_display(),
        stats.distance_km,
        stats.speed_kmh,
        heading,
        stats.pace(),
        stats.path_len
    );
}

fn print_summary(snapshot: &SessionSnapshot) {
    println!("\n=== Run {} ===", snapshot.id);
    println!("  Started:  {}", snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Distance: {:.3} km", snapshot.total_distance_km);
    println!("  Time:     {}", format_elapsed(snapshot.elapsed_seconds));
    println!("  Moving:   {}", format_elapsed(snapshot.moving_seconds));
    println!("  Pace:     {}", pace(snapshot.total_distance_km, snapshot.elapsed_seconds));
    println!("  Fixes:    {}", snapshot.path.len());
    for lap in &snapshot.laps {
        println!(
            "  Lap {:>2}:   {:.3} km  {}  {} pace",
            lap.number,
            lap.split_distance_km,
            format_elapsed(lap.split_seconds),
            lap.pace()
        );
    }
}

fn list(store_path: &Path) -> Result<()> {
    let store = JsonFileStore::open(store_path)?;
    let runs = store
        .list_all()
        .with_context(|| format!("reading {}", store_path.display()))?;

    if runs.is_empty() {
        println!("No saved runs in {}", store_path.display());
        return Ok(());
    }
    for run in &runs {
        println!("{}", run.summary());
    }
    Ok(())
}

fn delete(store_path: &Path, id: &str) -> Result<()> {
    let mut store = JsonFileStore::open(store_path)?;
    if !store.delete_by_id(id)? {
        bail!("no run with id {} in {}", id, store_path.display());
    }
    println!("Deleted {}", id);
    Ok(())
}

fn clear(store_path: &Path) -> Result<()> {
    let mut store = JsonFileStore::open(store_path)?;
    let removed = store
        .clear()
        .with_context(|| format!("clearing {}", store_path.display()))?;
    println!("Removed {} runs", removed);
    Ok(())
}

fn export_gpx(store_path: &Path, id: &str, out: Option<&Path>) -> Result<()> {
    let store = JsonFileStore::open(store_path)?;
    let run = store.get(id)?;
    let gpx = run.to_gpx();

    match out {
        Some(path) => {
            std::fs::write(path, gpx).with_context(|| format!("writing {}", path.display()))?;
            info!("Exported {} ({} points) to {}", id, run.path.len(), path.display());
        }
        None => print!("{}", gpx),
    }
    Ok(())
}
