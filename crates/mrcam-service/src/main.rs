//! mrcam lifecycle service entry point.
//!
//! Creates the shared segments, starts the lifecycle loop on its own thread,
//! and waits for Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()               -- config.toml or defaults
//!  └─ ServiceSegments::create()   -- camera, control, plugins, events
//!  └─ ServiceHandle::start()
//!       └─ LifecycleManager::run() (mrcam-injector thread)
//!            ├─ platform_scanner()     driver host discovery
//!            ├─ platform_injector()    remote module load
//!            └─ platform_remediator()  USB hub power fix
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mrcam_service::application::lifecycle::{LifecycleManager, ServiceHandle};
use mrcam_service::infrastructure::inject::{platform_injector, resolve_implant_path};
use mrcam_service::infrastructure::process::{platform_scanner, ProcessMatcher};
use mrcam_service::infrastructure::remediation::platform_remediator;
use mrcam_service::infrastructure::segments::ServiceSegments;
use mrcam_service::infrastructure::storage::config::{load_config, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The config is read before logging exists, so its error is held back.
    let (config, config_error) = match load_config() {
        Ok(config) => (config, None),
        Err(e) => (ServiceConfig::default(), Some(e)),
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level)),
        )
        .init();

    info!("mrcam service starting");
    if let Some(e) = config_error {
        warn!("using default configuration: {e}");
    }

    let control = config
        .control
        .to_record()
        .context("invalid [control] section")?;
    let segments = ServiceSegments::create(config.shm.dir.as_deref(), &control)
        .context("failed to create shared segments")?;

    let implant = resolve_implant_path(&config.target.implant_file);
    info!(path = %implant.display(), "camera module");

    let manager = LifecycleManager::new(
        Arc::clone(&segments.camera),
        platform_scanner(ProcessMatcher::from_config(&config.target)),
        platform_injector(implant),
        platform_remediator(),
        config.service.lifecycle_settings(),
    );
    let service = ServiceHandle::start(manager).context("failed to start lifecycle thread")?;

    info!("mrcam service ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    service.stop();
    drop(segments);

    info!("mrcam service stopped");
    Ok(())
}
