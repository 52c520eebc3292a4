//! signwatchd - traffic sign detection daemon
//!
//! This daemon:
//! 1. Opens a camera (or replays a video file)
//! 2. Runs object detection on each frame
//! 3. Serves the MJPEG stream and JSON snapshot API

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use signwatch::config::AppConfig;
use signwatch::orchestrator::{Orchestrator, RunOptions};

#[derive(Parser, Debug)]
#[command(name = "signwatchd", about = "Traffic sign detection daemon")]
struct Args {
    /// Replay a video file instead of opening the camera
    #[arg(long)]
    file: Option<PathBuf>,

    /// Request hardware acceleration for inference
    #[arg(long)]
    accel: bool,

    /// Disable detection and stream raw frames
    #[arg(long)]
    no_detect: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    log::info!("signwatchd {}", env!("CARGO_PKG_VERSION"));

    let mut cfg = AppConfig::load(args.config.as_deref())?;
    if args.accel {
        cfg.use_acceleration = true;
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        handler_flag.store(false, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let options = RunOptions {
        replay_file: args.file,
        disable_detection: args.no_detect,
    };

    let mut orchestrator = Orchestrator::new(cfg, options, running);
    orchestrator.run()
}
