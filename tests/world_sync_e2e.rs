use anyhow::Result;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use worldsync::logger::NoopLogger;
use worldsync::net::client;
use worldsync::net::server::{self, ServerSettings, Shutdown};
use worldsync::protocol::{CHUNK_SIZE, RESERVED_PREFIX};
use worldsync::storage::Storage;
use worldsync::{ErrorReason, SyncError, WorldName};

/// A real daemon loop on 127.0.0.1, stopped on drop.
struct TestServer {
    port: u16,
    root: PathBuf,
    shutdown: Shutdown,
    handle: Option<JoinHandle<()>>,
    _tmp: tempfile::TempDir,
}

impl TestServer {
    fn start() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let storage = Storage::open(&tmp.path().join("store"), Arc::new(NoopLogger))?;
        let root = storage.root().to_path_buf();
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let shutdown = Shutdown::new();
        let stop = shutdown.clone();
        let handle = std::thread::spawn(move || {
            let _ = server::serve_listener(
                listener,
                &storage,
                &NoopLogger,
                &ServerSettings::default(),
                &stop,
            );
        });
        Ok(Self {
            port,
            root,
            shutdown,
            handle: Some(handle),
            _tmp: tmp,
        })
    }

    fn raw(&self) -> Result<(TcpStream, BufReader<TcpStream>)> {
        let stream = TcpStream::connect(("127.0.0.1", self.port))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok((stream, reader))
    }

    fn reserved_leftovers(&self) -> Vec<String> {
        std::fs::read_dir(&self.root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(RESERVED_PREFIX))
            .collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn write_file(path: &Path, size: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body: Vec<u8> = (0..size).map(|i| (i * 31 % 253) as u8).collect();
    std::fs::write(path, body)?;
    Ok(())
}

fn sample_world(parent: &Path) -> Result<PathBuf> {
    let world = parent.join("myworld");
    write_file(&world.join("level.dat"), 100)?;
    write_file(&world.join("region/r.0.0.mca"), 5000)?;
    Ok(world)
}

fn tree(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            let body = e
                .file_type()
                .is_file()
                .then(|| std::fs::read(e.path()).unwrap());
            (rel, body)
        })
        .collect()
}

fn name(s: &str) -> WorldName {
    WorldName::new(s).unwrap()
}

#[test]
fn push_then_pull_reproduces_world() -> Result<()> {
    let srv = TestServer::start()?;
    let src = tempfile::tempdir()?;
    let world = sample_world(src.path())?;
    write_file(&world.join("region/big.mca"), CHUNK_SIZE * 2 + 123)?;
    write_file(&world.join("data/empty.dat"), 0)?;
    std::fs::create_dir_all(world.join("playerdata/none"))?;

    let pushed = client::push("127.0.0.1", srv.port, &world, &name("myworld"))?;
    assert_eq!(pushed.files, 4);
    assert_eq!(tree(&world), tree(&srv.root.join("myworld")));

    let dst = tempfile::tempdir()?;
    let out = dst.path().join("restored");
    let pulled = client::pull("127.0.0.1", srv.port, &name("myworld"), &out)?;
    assert_eq!(pulled, pushed);
    assert_eq!(tree(&world), tree(&out));
    assert!(srv.reserved_leftovers().is_empty());
    Ok(())
}

#[test]
fn list_reports_every_pushed_world() -> Result<()> {
    let srv = TestServer::start()?;
    assert!(client::list("127.0.0.1", srv.port)?.is_empty());

    let src = tempfile::tempdir()?;
    let world = sample_world(src.path())?;
    client::push("127.0.0.1", srv.port, &world, &name("a"))?;
    client::push("127.0.0.1", srv.port, &world, &name("b"))?;

    let mut names: Vec<String> = client::list("127.0.0.1", srv.port)?
        .into_iter()
        .map(|w| w.to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    Ok(())
}

#[test]
fn pull_of_missing_world_writes_nothing() -> Result<()> {
    let srv = TestServer::start()?;
    let dst = tempfile::tempdir()?;
    let out = dst.path().join("dest");

    let err = client::pull("127.0.0.1", srv.port, &name("nosuchworld"), &out).unwrap_err();
    assert_eq!(err.remote_reason(), Some(ErrorReason::NotFound));
    assert!(out.is_dir());
    assert!(std::fs::read_dir(&out)?.next().is_none());
    Ok(())
}

#[test]
fn repeated_push_replaces_contents() -> Result<()> {
    let srv = TestServer::start()?;
    let src = tempfile::tempdir()?;
    let world = sample_world(src.path())?;

    client::push("127.0.0.1", srv.port, &world, &name("myworld"))?;
    let first = tree(&srv.root.join("myworld"));
    client::push("127.0.0.1", srv.port, &world, &name("myworld"))?;
    assert_eq!(first, tree(&srv.root.join("myworld")));

    // A file gone from the source is gone from storage after the next push
    std::fs::remove_file(world.join("level.dat"))?;
    client::push("127.0.0.1", srv.port, &world, &name("myworld"))?;
    assert!(!srv.root.join("myworld/level.dat").exists());
    assert!(srv.root.join("myworld/region/r.0.0.mca").exists());
    assert!(srv.reserved_leftovers().is_empty());
    Ok(())
}

#[test]
fn invalid_names_are_refused_on_both_sides() -> Result<()> {
    let srv = TestServer::start()?;
    for bad in ["../evil", "", "a/b", "with space", ".."] {
        assert!(matches!(
            WorldName::new(bad),
            Err(SyncError::InvalidName(_))
        ));
    }

    let (mut stream, mut reader) = srv.raw()?;
    stream.write_all(b"PUSH 7\n../evil")?;
    let mut line = String::new();
    reader.read_line(&mut line)?;
    assert_eq!(line, "ERR InvalidName\n");

    assert!(client::list("127.0.0.1", srv.port)?.is_empty());
    assert!(!srv.root.parent().unwrap().join("evil").exists());
    Ok(())
}

#[test]
fn push_of_missing_directory_fails_before_connecting() -> Result<()> {
    // Nothing listens on this port; a connection attempt would surface as
    // a Connection error instead
    let port = {
        let sock = TcpListener::bind("127.0.0.1:0")?;
        sock.local_addr()?.port()
    };
    let tmp = tempfile::tempdir()?;
    let missing = tmp.path().join("missing");
    let err = client::push("127.0.0.1", port, &missing, &name("myworld")).unwrap_err();
    assert!(matches!(err, SyncError::Io { .. }));

    write_file(&tmp.path().join("plain"), 4)?;
    let err = client::push("127.0.0.1", port, &tmp.path().join("plain"), &name("x")).unwrap_err();
    assert!(matches!(err, SyncError::NotADirectory(_)));
    Ok(())
}

#[test]
fn dropped_push_leaves_stored_world_untouched() -> Result<()> {
    let srv = TestServer::start()?;
    let src = tempfile::tempdir()?;
    let world = sample_world(src.path())?;
    client::push("127.0.0.1", srv.port, &world, &name("myworld"))?;
    let before = tree(&srv.root.join("myworld"));

    {
        let (mut stream, mut reader) = srv.raw()?;
        stream.write_all(b"PUSH 7\nmyworld")?;
        let mut line = String::new();
        reader.read_line(&mut line)?;
        assert_eq!(line, "OK\n");
        stream.write_all(b"ENTRY 2 6 0\nregionENTRY 1 9 100\nlevel.dat")?;
        stream.write_all(&[0u8; 10])?;
        // Dropping both halves closes the connection mid-file
    }

    // Connections are served one at a time, so this waits for the abort
    let names = client::list("127.0.0.1", srv.port)?;
    assert_eq!(names, vec![name("myworld")]);
    assert_eq!(before, tree(&srv.root.join("myworld")));
    assert!(srv.reserved_leftovers().is_empty());
    Ok(())
}

#[test]
fn bad_command_lines_get_error_replies() -> Result<()> {
    let srv = TestServer::start()?;
    let cases: [(&[u8], &str); 4] = [
        (b"DELETE myworld\n", "ERR UnknownCommand\n"),
        (b"PUSH -1\n", "ERR InvalidCommand\n"),
        (b"LIST now\n", "ERR InvalidCommand\n"),
        (b"PULL 0\n", "ERR InvalidName\n"),
    ];
    for (request, expected) in cases {
        let (mut stream, mut reader) = srv.raw()?;
        stream.write_all(request)?;
        let mut reply = String::new();
        reader.read_to_string(&mut reply)?;
        assert_eq!(reply, expected, "{:?}", String::from_utf8_lossy(request));
    }

    // An unterminated line past the limit is refused without waiting for more
    let (mut stream, mut reader) = srv.raw()?;
    stream.write_all(&vec![b'A'; 2048])?;
    let mut line = String::new();
    reader.read_line(&mut line)?;
    assert_eq!(line, "ERR InvalidCommand\n");
    Ok(())
}
