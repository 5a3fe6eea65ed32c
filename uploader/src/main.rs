mod driver;
mod encode;
mod shutdown;
mod source;
#[cfg(test)]
mod testing;
mod upload;

use coffee_cam_common::config::Config;
use driver::Driver;
use shutdown::StopSignal;
use std::path::PathBuf;
use tracing::{error, info};
use upload::HttpUploader;

const DEFAULT_CONFIG_PATH: &str = "coffee-cam.toml";

#[tokio::main]
async fn main() {
    let explicit_path = std::env::args().nth(1).map(PathBuf::from);
    let config_path = explicit_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    // Built-in defaults apply only when no path was given and the default
    // file is absent.
    let config = if explicit_path.is_none() && !config_path.exists() {
        Ok(Config::default())
    } else {
        Config::load(&config_path)
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = %config.camera.source,
        width = config.camera.width,
        height = config.camera.height,
        fps = config.camera.fps,
        endpoint = config.upload.endpoint,
        quality = config.upload.jpeg_quality,
        interval_secs = config.schedule.interval_secs,
        auth = config.upload.bearer_token.is_some(),
        "starting coffee-cam"
    );

    let uploader = match HttpUploader::new(&config.upload) {
        Ok(u) => u,
        Err(e) => {
            error!(error = %e, "failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let camera = match source::open(&config.camera) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "could not open camera");
            std::process::exit(1);
        }
    };

    let stop = StopSignal::new();
    shutdown::listen_for_signals(stop.clone());

    let driver = Driver::new(camera, uploader, &config.upload, &config.schedule, stop);
    let shots = driver.run().await;
    info!(shots, "shutdown complete");
}
