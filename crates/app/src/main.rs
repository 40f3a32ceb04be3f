mod demo;
mod drivers;

use std::{path::PathBuf, thread, time::Duration};

use atmo_core::{
    config::diff, ConfigSource, DriverHandle, Observer, ParameterSet, ParameterStore, Service,
    SettingsFile,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::{demo::SyntheticFrameSource, drivers::MeanDriver};

fn main() -> atmo_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            settings,
            play,
            idle,
            aspect,
        } => run_service(settings, play, idle, aspect),
        Commands::Init { settings, force } => init_settings(settings, force),
        Commands::Check { settings } => check_settings(settings),
    }
}

fn run_service(settings: PathBuf, play: f64, idle: f64, aspect: f32) -> atmo_core::Result<()> {
    tracing::info!(?settings, play, idle, "starting service");

    let handle = DriverHandle::new(
        Box::new(MeanDriver::new()),
        drivers::registry(),
        Observer::with_tracing(),
    );
    let frames = SyntheticFrameSource::new(Duration::from_secs_f64(play.max(0.0)))
        .with_aspect_ratio(aspect);
    let service = Service::new(handle, SettingsFile::new(settings), frames);

    let stop = service.stop_signal();
    let timer = {
        let stop = stop.clone();
        let total = Duration::from_secs_f64((play + idle).max(0.0));
        thread::spawn(move || {
            stop.wait_timeout(total);
            stop.request();
        })
    };

    let outcome = service.run();
    stop.request();
    let _ = timer.join();
    outcome
}

fn init_settings(settings: PathBuf, force: bool) -> atmo_core::Result<()> {
    let mut file = SettingsFile::new(&settings);
    if !force && file.modified()?.is_some() {
        tracing::warn!(?settings, "settings already exist, use --force to overwrite");
        return Ok(());
    }
    file.write(&ParameterSet::defaults().to_settings())?;
    tracing::info!(?settings, "default settings written");
    Ok(())
}

fn check_settings(settings: PathBuf) -> atmo_core::Result<()> {
    let store = ParameterStore::new(SettingsFile::new(&settings));
    let snapshot = store.read()?;

    let changes = diff(&ParameterSet::defaults(), &snapshot.parameters);
    for change in &changes {
        tracing::info!("{change}");
    }
    tracing::info!(?settings, changed = changes.len(), "settings are valid");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Atmolight ambient lighting service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the service against a synthetic video source.
    Run {
        /// Settings file to load and watch for changes.
        #[arg(short, long)]
        settings: PathBuf,
        /// Seconds of simulated video playback.
        #[arg(long, default_value_t = 10.0)]
        play: f64,
        /// Seconds to stay idle after playback before stopping.
        #[arg(long, default_value_t = 2.0)]
        idle: f64,
        /// Aspect ratio of the simulated video.
        #[arg(long, default_value_t = 16.0 / 9.0)]
        aspect: f32,
    },
    /// Write the default settings.
    Init {
        #[arg(short, long)]
        settings: PathBuf,
        /// Overwrite existing settings.
        #[arg(long)]
        force: bool,
    },
    /// Validate settings and list values that differ from the defaults.
    Check {
        #[arg(short, long)]
        settings: PathBuf,
    },
}
