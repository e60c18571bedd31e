//! mrcam-tester: a headless consumer for checking the camera pipeline.
//!
//! Opens the service's segments, starts the reader, and logs every frame it
//! acquires along with control-channel changes.  Exits on Ctrl-C or after
//! `--frames N` frames.
//!
//! ```text
//! mrcam-tester --frames 100
//! MRCAM_SHM_DIR=/tmp/mrcam mrcam-tester --remediate
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mrcam_client::application::reader::CameraClient;
use mrcam_client::infrastructure::segments::open_channels;
use mrcam_core::clock::now_usec;

/// Render-loop cadence of the tester.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Parser)]
#[command(name = "mrcam-tester", version, about = "Log frames from the mrcam camera pipeline")]
struct Args {
    /// Exit after this many frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Directory holding file-backed segments instead of named objects.
    #[arg(long, env = "MRCAM_SHM_DIR")]
    shm_dir: Option<PathBuf>,

    /// Ask the service to run the USB hub power fix once at startup.
    #[arg(long)]
    remediate: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let channels = open_channels(args.shm_dir.as_deref())
        .context("could not open camera segments; is mrcam-service running?")?;
    let mut client = CameraClient::new(channels);
    client.start()?;

    if args.remediate {
        client.request_remediation();
    }

    let mut received = 0u64;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {}
        }

        if let Some(record) = client.read_ui_state() {
            info!(
                passthrough = record.passthrough_enabled(),
                disable_win_y = record.disable_win_y != 0,
                terminate = record.terminate_requested(),
                "control record changed"
            );
        }

        if let Some(frame) = client.acquire_next_frame() {
            received += 1;
            info!(
                frame = frame.number(),
                bytes = frame.len(),
                age_ms = frame.age_usec(now_usec()) as f64 / 1000.0,
                stereo = frame.stereo_image().is_some(),
                "frame"
            );
            drop(frame);
            client.release_frame();

            if args.frames.is_some_and(|limit| received >= limit) {
                break;
            }
        }
    }

    client.stop();
    info!(frames = received, "mrcam-tester finished");
    Ok(())
}
