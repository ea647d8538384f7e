//! `relocd` – marker-triggered relocalization daemon.
//!
//! 1. Loads the calibration and tuning from `~/.reloc/config.toml` (or
//!    `--config`); any configuration error aborts with a non-zero status.
//! 2. Replays JSON-lines input (`--input <file>` or stdin): transforms go into
//!    the frame buffer, marker sightings into the relocalization queue.
//! 3. Prints every pose correction to stdout as one JSON line, followed by the
//!    `world → correction_frame` transform when one is configured.
//! 4. **Ctrl-C** stops reading input; queued observations are still
//!    finished before exit.

mod config;
mod output;
mod replay;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use reloc_perception::SharedTfBuffer;
use reloc_runtime::{RelocEngine, init_tracing, spawn_worker};
use reloc_types::RelocError;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::output::JsonLinesSink;

#[derive(Debug, Parser)]
#[command(name = "relocd", version, about = "Reset the localization estimate whenever a surveyed marker is seen")]
struct Cli {
    /// Configuration file (default: ~/.reloc/config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON-lines input file; reads stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    // Before the runtime exists: the OTLP exporter is synchronous.
    let _guard = init_tracing("relocd");

    let path = cli.config.unwrap_or_else(config::config_path);
    let cfg = match config::load_from(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, path = %path.display(), "cannot load configuration");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cfg, cli.input));
    // Stdin reads may still be parked on a blocking thread.
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "relocd failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: config::Config, input: Option<PathBuf>) -> Result<(), RelocError> {
    let engine_config = cfg.engine_config()?;
    let buffer = SharedTfBuffer::new(cfg.tf_cache_duration()?);

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| RelocError::Config(format!("failed to open input {}: {e}", path.display())))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    info!(
        markers = engine_config.calibration.len(),
        world_frame = %engine_config.world_frame,
        body_frame = %engine_config.body_frame,
        transform_timeout_ms = engine_config.transform_timeout.as_millis() as u64,
        "relocd starting"
    );

    let sink = output_sink(&cfg, std::io::stdout());
    let (queue, worker) = spawn_worker(RelocEngine::new(engine_config, buffer.clone(), sink), cfg.queue_capacity);

    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; only end of input stops relocd");
    }

    let replayed = replay::replay(reader, &buffer, &queue, stop_rx).await;

    // The worker finishes its backlog once the last queue handle is gone.
    drop(queue);
    let stats = worker
        .await
        .map_err(|e| RelocError::Channel(format!("relocalization worker failed: {e}")))?;

    info!(
        transforms = replayed.transforms,
        markers = replayed.markers,
        skipped_lines = replayed.skipped,
        emitted = stats.emitted,
        discarded = stats.discarded,
        dropped = stats.dropped,
        "relocd finished"
    );
    Ok(())
}

fn output_sink<W: std::io::Write + Send>(cfg: &config::Config, out: W) -> JsonLinesSink<W> {
    let sink = JsonLinesSink::new(out);
    match &cfg.correction_frame {
        Some(frame) => sink.with_correction_frame(frame.clone()),
        None => sink,
    }
}
