//! Relay MCP collaboration server binary.
//!
//! Loads layered configuration, constructs the collaboration engine, starts
//! the periodic cleanup sweep, and accepts client connections until asked to
//! shut down.

mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use relay_core::config::Config;
use relay_core::Server;
use tracing::info;

/// Relay command line arguments.
#[derive(Parser, Debug)]
#[command(name = "relay-server")]
#[command(about = "Relay MCP collaboration server")]
struct Args {
	/// Path to a TOML configuration file, layered over compiled defaults.
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Overrides `server.port` from the resolved configuration.
	#[arg(short, long)]
	port: Option<u16>,

	/// Overrides `server.host` from the resolved configuration.
	#[arg(long)]
	host: Option<String>,

	/// Verbose logging.
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	info!("starting relay-server");

	let config_path = args.config.or_else(relay_core::config::default_config_path);
	let mut config = Config::load(config_path.as_deref())?;
	if let Some(port) = args.port {
		config.server.port = port;
	}
	if let Some(host) = args.host {
		config.server.host = host;
	}

	let addr = format!("{}:{}", config.server.host, config.server.port);

	let server = Arc::new(Server::with_defaults(config));
	let cleanup_handle = server.spawn_cleanup_sweep();

	let shutdown = server.shutdown.token();
	let transport_shutdown = shutdown.clone();
	let transport_server = server.clone();
	let transport_handle = tokio::spawn(async move {
		transport::serve(transport_server, addr, transport_shutdown).await
	});

	wait_for_shutdown_signal().await;
	info!("shutdown signal received");
	server
		.shutdown
		.shutdown("server is shutting down for maintenance", false, 0)
		.await;

	let _ = transport_handle.await?;
	cleanup_handle.abort();

	info!("relay-server stopped");
	Ok(())
}

async fn wait_for_shutdown_signal() {
	use tokio::signal::unix::{signal, SignalKind};

	let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
	tokio::select! {
		_ = tokio::signal::ctrl_c() => {}
		_ = sigterm.recv() => {}
	}
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::prelude::*;
	use tracing_subscriber::EnvFilter;

	if let Some(log_dir) = std::env::var("RELAY_LOG_DIR").ok().map(PathBuf::from) {
		if std::fs::create_dir_all(&log_dir).is_ok() {
			let pid = std::process::id();
			let log_path = log_dir.join(format!("relay-server.{}.log", pid));

			if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
				let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
					if verbose {
						EnvFilter::new("relay_core=trace,relay_server=trace,debug")
					} else {
						EnvFilter::new("relay_core=debug,relay_server=debug,info")
					}
				});

				let file_layer = tracing_subscriber::fmt::layer()
					.with_writer(file)
					.with_ansi(false)
					.with_span_events(FmtSpan::CLOSE)
					.with_target(true);

				tracing_subscriber::registry().with(filter).with(file_layer).init();

				tracing::info!(path = ?log_path, "relay-server tracing initialized");
				return;
			}
		}
	}

	tracing_subscriber::fmt()
		.with_max_level(if verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.init();
}

#[cfg(not(unix))]
compile_error!("relay-server currently targets unix signal handling only");
