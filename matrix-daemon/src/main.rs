//! Binary HDMI Matrix Daemon
//!
//! Drives a B-100/300 matrix over RS-232. Service calls are read from stdin,
//! one per line; state changes and call results are written to stdout as
//! JSON lines. Logs go to stderr.

mod ports;
mod service;
mod settings;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use matrix_control::{Connector, FnConnector, MatrixController, MatrixEvent};
use matrix_protocol::MatrixSize;
use matrix_sim::{VirtualMatrix, VirtualMatrixConfig};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use service::ServiceCall;
use settings::{Settings, SettingsOverrides};

/// Port name used for the built-in virtual matrix
const SIM_PORT: &str = "VSIM:matrix";

#[derive(Parser, Debug)]
#[command(
    name = "matrixd",
    version,
    about = "Control a Binary B-100/300 HDMI matrix over RS-232",
    long_about = "Reads service calls from stdin (e.g. `set_route 1 3`, `output_off 2`, `state`) \
                  and prints matrix state changes to stdout as JSON lines."
)]
struct Args {
    /// Settings file (default: $XDG_CONFIG_HOME/matrixd/settings.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port path
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Status dump command; an empty string disables polling
    #[arg(long)]
    status_command: Option<String>,

    /// Seconds between status polls
    #[arg(long)]
    poll_seconds: Option<u64>,

    /// Matrix size (4x4 or 8x8)
    #[arg(short, long)]
    size: Option<MatrixSize>,

    /// Write the merged settings back to the settings file
    #[arg(long)]
    save: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Run against a built-in virtual matrix
    #[arg(long)]
    simulate: bool,
}

impl Args {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            port: self.port.clone(),
            baud_rate: self.baud,
            status_command: self.status_command.clone(),
            poll_seconds: self.poll_seconds,
            size: self.size,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "matrixd=info,matrix_control=info,matrix_protocol=info,matrix_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if args.list_ports {
        for port in ports::list_ports() {
            println!("{}", port.display_label());
        }
        return Ok(());
    }

    let path = match &args.config {
        Some(path) => path.clone(),
        None => Settings::default_path().context("could not determine settings path")?,
    };
    let mut settings = Settings::load_from(&path)?;
    settings.apply(args.overrides());

    if args.save {
        settings.save_to(&path)?;
        info!("Saved settings to {}", path.display());
    }

    let mut config = settings.controller_config();
    if args.simulate {
        config.port = SIM_PORT.to_string();
        let shared = Arc::new(Mutex::new(VirtualMatrix::from_config(VirtualMatrixConfig {
            size: config.size,
            status_command: config.status_command.clone(),
            ..Default::default()
        })));
        let connector = FnConnector::new(SIM_PORT, move || matrix_sim::connect(&shared));
        run(Arc::new(MatrixController::new(config, connector))).await
    } else {
        run(Arc::new(MatrixController::serial(config))).await
    }
}

async fn run<C: Connector>(controller: Arc<MatrixController<C>>) -> anyhow::Result<()> {
    info!(
        "Starting {} ({}) on {}",
        controller.identity().display_name,
        controller.size(),
        controller.port_name()
    );

    let printer = tokio::spawn(print_events(controller.subscribe()));
    let poller = controller
        .start()
        .await
        .with_context(|| format!("failed to start matrix on {}", controller.port_name()))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&controller, &line).await,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }

    if let Some(poller) = poller {
        poller.stop().await;
    }
    controller.close().await;
    printer.abort();
    info!("Shut down");
    Ok(())
}

async fn handle_line<C: Connector>(controller: &MatrixController<C>, line: &str) {
    let call = match ServiceCall::parse(line, controller.size()) {
        Ok(Some(call)) => call,
        Ok(None) => return,
        Err(e) => {
            println!("{}", json!({ "call": line.trim(), "error": e.to_string() }));
            return;
        }
    };

    let name = call.name();
    let response = match call.execute(controller).await {
        Ok(result) => json!({ "call": name, "result": result }),
        Err(e) => {
            warn!("{} failed: {}", name, e);
            json!({ "call": name, "error": e.to_string() })
        }
    };
    println!("{}", response);
}

async fn print_events(mut events: broadcast::Receiver<MatrixEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Failed to serialize event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Dropped {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "matrixd",
            "--port",
            "/dev/ttyUSB1",
            "--size",
            "8x8",
            "--status-command",
            "",
            "--simulate",
        ]);
        assert!(args.simulate);
        assert!(!args.save);

        let overrides = args.overrides();
        assert_eq!(overrides.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(overrides.size, Some(MatrixSize::EightByEight));
        assert_eq!(overrides.status_command.as_deref(), Some(""));
        assert_eq!(overrides.baud_rate, None);
    }

    #[test]
    fn test_args_reject_bad_size() {
        assert!(Args::try_parse_from(["matrixd", "--size", "5x5"]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_line_against_virtual_matrix() {
        let shared = Arc::new(Mutex::new(VirtualMatrix::new(MatrixSize::FourByFour)));
        let device = Arc::clone(&shared);
        let connector = FnConnector::new(SIM_PORT, move || matrix_sim::connect(&device));
        let controller = MatrixController::new(
            matrix_control::ControllerConfig::new(SIM_PORT, MatrixSize::FourByFour),
            connector,
        );

        handle_line(&controller, "set_route 2 4").await;
        handle_line(&controller, "set_route 9 9").await;
        handle_line(&controller, "send_raw 0300\\r").await;

        assert_eq!(controller.routes(), vec![1, 4, 1, 1]);
        let matrix = shared.lock().unwrap();
        assert_eq!(matrix.route(2), Some(4));
        assert_eq!(matrix.is_powered(3), Some(false));
    }
}
