//! Client remote configuration: `host=` and `port=` lines in
//! `./.worldsync/config`.

use anyhow::{bail, Context, Result};
use std::io::Write as _;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".worldsync";
pub const CONFIG_FILE: &str = "config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
}

impl ClientConfig {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        if host.is_empty() || host.contains(['\n', '\r']) {
            bail!("invalid host {host:?}");
        }
        if port == 0 {
            bail!("port must be between 1 and 65535");
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Parse config text. Unknown lines are ignored and the last value of a
    /// key wins; both keys must end up set.
    pub fn parse(text: &str) -> Result<Self> {
        let mut host = None;
        let mut port = None;
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(value) = line.strip_prefix("host=") {
                host = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("port=") {
                port = Some(
                    value
                        .trim()
                        .parse::<u16>()
                        .ok()
                        .filter(|p| *p != 0)
                        .with_context(|| format!("invalid port {value:?}"))?,
                );
            }
        }
        match (host, port) {
            (Some(host), Some(port)) => Self::new(&host, port),
            (None, _) => bail!("missing host= line"),
            (_, None) => bail!("missing port= line"),
        }
    }

    pub fn render(&self) -> String {
        format!("host={}\nport={}\n", self.host, self.port)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| {
            format!(
                "no remote configured at {} (run `worldsync init <host> <port>`)",
                path.display()
            )
        })?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Write atomically: a temp file beside the target, then rename over it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(self.render().as_bytes())?;
        tmp.flush()?;
        tmp.persist(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

/// `./.worldsync/config`, relative to the working directory.
pub fn default_path() -> PathBuf {
    Path::new(CONFIG_DIR).join(CONFIG_FILE)
}
