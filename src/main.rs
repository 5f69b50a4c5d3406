//! worldsync client: one command per invocation against the configured
//! remote.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;

use worldsync::cli::{ClientCommand, ClientOpts};
use worldsync::config::{self, ClientConfig};
use worldsync::net::client;
use worldsync::WorldName;

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Exiting...");
        // 128 + SIGINT
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let opts = ClientOpts::parse();
    let config_path = opts.config.clone().unwrap_or_else(config::default_path);

    match opts.command {
        ClientCommand::Init { host, port } => cmd_init(&config_path, &host, port),
        ClientCommand::List => cmd_list(&config_path),
        ClientCommand::Push { dir, name } => cmd_push(&config_path, &dir, name.as_deref()),
        ClientCommand::Pull { name, dest } => cmd_pull(&config_path, &name, &dest),
    }
}

fn cmd_init(config_path: &Path, host: &str, port: u16) -> Result<()> {
    let cfg = ClientConfig::new(host, port)?;
    cfg.save(config_path)?;
    println!("Initialized worldsync remote at {}:{}", cfg.host, cfg.port);
    Ok(())
}

fn cmd_list(config_path: &Path) -> Result<()> {
    let cfg = ClientConfig::load(config_path)?;
    let worlds = client::list(&cfg.host, cfg.port)
        .with_context(|| format!("list failed on {}:{}", cfg.host, cfg.port))?;
    for world in worlds {
        println!("{world}");
    }
    Ok(())
}

fn cmd_push(config_path: &Path, dir: &Path, name: Option<&str>) -> Result<()> {
    // Names are checked before anything touches the network
    let name = match name {
        Some(name) => WorldName::new(name)?,
        None => WorldName::for_directory(dir)
            .with_context(|| format!("cannot derive a world name from {}", dir.display()))?,
    };
    let cfg = ClientConfig::load(config_path)?;
    client::push(&cfg.host, cfg.port, dir, &name)
        .with_context(|| format!("push of '{name}' failed"))?;
    println!("Pushed world '{name}'");
    Ok(())
}

fn cmd_pull(config_path: &Path, name: &str, dest: &Path) -> Result<()> {
    let name = WorldName::new(name)?;
    let cfg = ClientConfig::load(config_path)?;
    client::pull(&cfg.host, cfg.port, &name, dest)
        .with_context(|| format!("pull of '{name}' failed"))?;
    println!("Pulled world '{}' into {}", name, dest.display());
    Ok(())
}
