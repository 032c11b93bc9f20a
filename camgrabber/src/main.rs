/*!
# Camera Grabber Application

Pulls JPEG frames from a microcontroller camera over a serial (or TCP) link,
republishes the latest frame as an MJPEG stream and periodically asks an image
classifier which material is in front of the camera, relaying the answer to a
sorting actuator on the same link.

## Features

- Command/response capture handshake with per-phase deadlines
- Automatic link reopening with fixed backoff
- MJPEG feed for any number of browser viewers
- On-demand classification and status endpoints
- Single-frame snapshot mode for bench testing

## Usage

### Serve (default)
```bash
camgrabber --config camgrabber.toml serve --link-port /dev/rfcomm0
```

### Generate a configuration file
```bash
camgrabber config --output camgrabber.toml
```

### Capture one frame to disk
```bash
camgrabber snapshot --output frame.jpg
```
*/

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cache;
mod capture;
mod classifier;
mod config;
mod handshake;
mod server;
mod stats;
mod stream;
mod supervisor;
mod transport;
mod trigger;

use cache::FrameCache;
use capture::CaptureScheduler;
use classifier::GeminiClassifier;
use config::{AppConfig, LinkConfig, LinkKind, LinkSession};
use handshake::FrameReader;
use server::AppState;
use stream::StreamPacing;
use supervisor::LinkSupervisor;
use transport::{LinkConnector, SerialConnector, TcpConnector};
use trigger::ClassificationTrigger;

/// How long to wait for the other half of the service after one half stops
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "camgrabber")]
#[command(about = "Serial camera capture, MJPEG republishing and material classification")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "camgrabber.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture continuously and serve the HTTP endpoints
    Serve {
        #[command(flatten)]
        link: LinkArgs,

        /// HTTP port
        #[arg(long)]
        http_port: Option<u16>,

        /// Disable periodic and on-demand classification
        #[arg(long)]
        no_classify: bool,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "camgrabber.toml")]
        output: PathBuf,
    },

    /// Capture a single frame and save it as a JPEG file
    Snapshot {
        #[command(flatten)]
        link: LinkArgs,

        /// Output image path
        #[arg(short, long, default_value = "snapshot.jpg")]
        output: PathBuf,
    },
}

/// Link overrides shared by the commands that talk to the camera
#[derive(Args, Debug, Default)]
struct LinkArgs {
    /// Serial device path or host:port of the camera
    #[arg(long)]
    link_port: Option<String>,

    /// Link kind
    #[arg(long, value_enum)]
    link_kind: Option<LinkKind>,
}

impl LinkArgs {
    fn apply(self, link: &mut LinkConfig) {
        if let Some(port) = self.link_port {
            link.port = port;
        }
        if let Some(kind) = self.link_kind {
            link.kind = kind;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, filtered by RUST_LOG
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Some(Commands::Serve {
            link,
            http_port,
            no_classify,
        }) => {
            let mut config = load_config(&cli.config)?;
            link.apply(&mut config.link);
            if let Some(port) = http_port {
                config.server.port = port;
            }
            if no_classify {
                config.classifier.enabled = false;
            }
            run_serve(config)
        }

        Some(Commands::Config { output }) => generate_config_file(output),

        Some(Commands::Snapshot { link, output }) => {
            let mut config = load_config(&cli.config)?;
            link.apply(&mut config.link);
            run_snapshot(config, output)
        }

        None => run_serve(load_config(&cli.config)?),
    }
}

/// Load the configuration, falling back to defaults when the file is absent
fn load_config(path: &Path) -> Result<AppConfig> {
    let config = if path.exists() {
        info!("📄 Loading configuration from {}", path.display());
        AppConfig::load_from_file(path)?
    } else {
        warn!("⚠️ Config file {} not found, using defaults", path.display());
        AppConfig::new()
    };
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start async runtime")
}

/// Run capture and the HTTP server until Ctrl+C or link loss
fn run_serve(config: AppConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    runtime()?.block_on(async move {
        match config.link.kind {
            LinkKind::Serial => serve(config, SerialConnector).await,
            LinkKind::Tcp => serve(config, TcpConnector).await,
        }
    })
}

async fn serve<C>(config: AppConfig, connector: C) -> Result<()>
where
    C: LinkConnector + 'static,
{
    let cache = Arc::new(FrameCache::new());
    let trigger = build_trigger(&config)?;

    let supervisor = LinkSupervisor::from_config(connector, &config.link);
    let mut scheduler = CaptureScheduler::new(
        supervisor,
        Arc::clone(&cache),
        trigger.clone(),
        &config.capture,
    );

    // Set up Ctrl+C handler
    let running = scheduler.running_flag();
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            info!("🛑 Received Ctrl+C, shutting down gracefully...");
            running.store(false, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let state = AppState {
        cache,
        stats: scheduler.stats_handle(),
        trigger,
        pacing: StreamPacing {
            poll_interval: Duration::from_millis(config.server.poll_interval_ms),
            idle_interval: Duration::from_millis(config.server.idle_interval_ms),
        },
    };
    let app = server::create_router(state);

    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;
    info!("🌐 Video feed at http://{}/video_feed", addr);

    let mut capture = tokio::spawn(async move { scheduler.run().await });
    let shutdown = wait_for_shutdown(Arc::clone(&running));
    let mut http = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    });

    tokio::select! {
        joined = &mut capture => {
            running.store(false, Ordering::SeqCst);
            let result = joined.context("Capture task panicked")?;
            // Open MJPEG viewers keep the server alive; don't wait on them forever
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut http).await.is_err() {
                warn!("⚠️ HTTP viewers still connected, closing anyway");
            }
            result.context("Capture stopped")?;
        }
        joined = &mut http => {
            running.store(false, Ordering::SeqCst);
            joined
                .context("HTTP server task panicked")?
                .context("HTTP server failed")?;
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut capture).await.is_err() {
                warn!("⚠️ Capture loop did not stop in time");
            }
        }
    }

    info!("✅ Camera grabber stopped");
    Ok(())
}

async fn wait_for_shutdown(running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("🛑 Stopping HTTP server");
}

/// Classification trigger, or `None` when disabled
fn build_trigger(config: &AppConfig) -> Result<Option<ClassificationTrigger>> {
    if !config.classifier.enabled {
        info!("🔕 Classification disabled");
        return Ok(None);
    }

    let classifier = GeminiClassifier::from_config(&config.classifier)
        .context("Failed to set up classifier (use --no-classify to run without it)")?;
    info!(
        "🧠 Classifying every {} frames with {}",
        config.capture.classify_every, config.classifier.model
    );

    Ok(Some(ClassificationTrigger::from_config(
        Arc::new(classifier),
        &config.classifier.prompt,
        &config.capture,
    )))
}

/// Capture one frame and write it to `output`
fn run_snapshot(config: AppConfig, output: PathBuf) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    runtime()?.block_on(async move {
        match config.link.kind {
            LinkKind::Serial => snapshot(&config, SerialConnector, &output).await,
            LinkKind::Tcp => snapshot(&config, TcpConnector, &output).await,
        }
    })
}

async fn snapshot<C: LinkConnector>(config: &AppConfig, connector: C, output: &Path) -> Result<()> {
    let session = LinkSession::from(&config.link);
    let mut transport = connector.open(&session).await?;
    let mut reader = FrameReader::new(&session);

    let frame = reader
        .capture(&mut transport)
        .await
        .context("Capture failed")?;

    tokio::fs::write(output, frame.data())
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!("💾 Saved {} byte frame to {}", frame.len(), output.display());
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   camgrabber --config {} serve", output_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_overrides_parse() {
        let cli = Cli::try_parse_from([
            "camgrabber",
            "serve",
            "--link-port",
            "10.0.0.7:8888",
            "--link-kind",
            "tcp",
            "--http-port",
            "8080",
            "--no-classify",
        ])
        .unwrap();

        let Some(Commands::Serve {
            link,
            http_port,
            no_classify,
        }) = cli.command
        else {
            panic!("expected serve command");
        };

        let mut link_config = LinkConfig::default();
        link.apply(&mut link_config);
        assert_eq!(link_config.port, "10.0.0.7:8888");
        assert_eq!(link_config.kind, LinkKind::Tcp);
        assert_eq!(http_port, Some(8080));
        assert!(no_classify);
    }

    #[test]
    fn test_no_subcommand_defaults() {
        let cli = Cli::try_parse_from(["camgrabber"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("camgrabber.toml"));
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_disabled_classifier_builds_no_trigger() {
        let mut config = AppConfig::new();
        config.classifier.enabled = false;
        assert!(build_trigger(&config).unwrap().is_none());
    }
}
