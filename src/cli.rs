//! Clap option structs for the worldsync binaries

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::protocol::DEFAULT_PORT;

/// Daemon options for worldsyncd
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "worldsync daemon - stores worlds pushed by clients")]
pub struct DaemonOpts {
    /// Storage root; one subdirectory per world
    #[arg(long)]
    pub storage: PathBuf,

    /// TCP port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Append log lines to this file instead of stderr
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Read/write timeout for client sockets, in seconds (default: none)
    #[arg(long = "io-timeout", value_parser = clap::value_parser!(u64).range(1..))]
    pub io_timeout: Option<u64>,
}

impl DaemonOpts {
    pub fn bind_addr(&self) -> String {
        // Bare IPv6 literals need brackets before a port is appended
        if self.bind.contains(':') && !self.bind.starts_with('[') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }
}

/// Client options for worldsync
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "worldsync - push and pull game worlds to a worldsync server")]
pub struct ClientOpts {
    /// Config file (default: ./.worldsync/config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// Record the server to talk to
    Init { host: String, port: u16 },
    /// Print the stored world names, one per line
    List,
    /// Upload a world directory, replacing the stored copy
    Push {
        dir: PathBuf,
        /// World name (default: the directory's name)
        name: Option<String>,
    },
    /// Download a world into a directory
    Pull { name: String, dest: PathBuf },
}
