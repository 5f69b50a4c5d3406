use anyhow::Result;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::error::ErrorReason;
use crate::tree::TreeStats;
use crate::world::WorldName;

pub trait Logger: Send + Sync {
    fn listening(&self, _addr: &str, _root: &Path) {}
    fn connection(&self, _peer: &str) {}
    fn rejected(&self, _peer: &str, _reason: ErrorReason, _detail: &str) {}
    fn push_committed(&self, _world: &WorldName, _stats: &TreeStats) {}
    fn pull_served(&self, _world: &WorldName, _stats: &TreeStats) {}
    fn list_served(&self, _count: usize) {}
    fn recovered(&self, _action: &str, _path: &Path) {}
    /// A directory that should have been removed was left behind.
    fn leak(&self, _path: &Path, _msg: &str) {}
    fn error(&self, _context: &str, _msg: &str) {}
    fn shutdown(&self) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: Mutex::new(Box::new(f)),
        })
    }

    pub fn stderr() -> Self {
        Self {
            out: Mutex::new(Box::new(std::io::stderr())),
        }
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.out.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn listening(&self, addr: &str, root: &Path) {
        self.line(&format!("LISTEN addr={} root={}", addr, root.display()));
    }
    fn connection(&self, peer: &str) {
        self.line(&format!("CONN peer={peer}"));
    }
    fn rejected(&self, peer: &str, reason: ErrorReason, detail: &str) {
        self.line(&format!("REJECT peer={peer} reason={reason} detail={detail}"));
    }
    fn push_committed(&self, world: &WorldName, stats: &TreeStats) {
        self.line(&format!(
            "PUSH world={} files={} dirs={} bytes={}",
            world, stats.files, stats.directories, stats.bytes
        ));
    }
    fn pull_served(&self, world: &WorldName, stats: &TreeStats) {
        self.line(&format!(
            "PULL world={} files={} dirs={} bytes={}",
            world, stats.files, stats.directories, stats.bytes
        ));
    }
    fn list_served(&self, count: usize) {
        self.line(&format!("LIST count={count}"));
    }
    fn recovered(&self, action: &str, path: &Path) {
        self.line(&format!("RECOVER action={} path={}", action, path.display()));
    }
    fn leak(&self, path: &Path, msg: &str) {
        self.line(&format!("LEAK path={} msg={}", path.display(), msg));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={context} msg={msg}"));
    }
    fn shutdown(&self) {
        self.line("SHUTDOWN");
    }
}
