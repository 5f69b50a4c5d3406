use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use worldsync::cli::DaemonOpts;
use worldsync::logger::{Logger, TextLogger};
use worldsync::net::server::{self, ServerSettings, Shutdown};
use worldsync::storage::Storage;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    let logger: Arc<dyn Logger> = match &opts.log_file {
        Some(path) => Arc::new(
            TextLogger::new(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?,
        ),
        None => Arc::new(TextLogger::stderr()),
    };

    let storage = Storage::open(&opts.storage, Arc::clone(&logger))
        .with_context(|| format!("Failed to open storage root {}", opts.storage.display()))?;

    let shutdown = Shutdown::new();
    let on_signal = shutdown.clone();
    ctrlc::set_handler(move || on_signal.trigger())
        .context("Error setting Ctrl-C handler")?;

    let bind = opts.bind_addr();
    if opts.bind.starts_with("0.0.0.0") || opts.bind == "::" {
        eprintln!("WARNING: listening on all interfaces; the protocol has no authentication");
    }

    let settings = ServerSettings {
        io_timeout: opts.io_timeout.map(Duration::from_secs),
    };
    server::serve(&bind, &storage, logger.as_ref(), &settings, &shutdown)
        .with_context(|| format!("Server on {bind} failed"))
}
