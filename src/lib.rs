//! worldsync: push and pull whole game-world directories to a central server
//!
//! A small line protocol over TCP carries one command per connection. The
//! server stores each world as a plain directory and swaps uploads in by
//! rename, so a reader never sees a half-written world.

pub mod cli;
pub mod config;
pub mod error;
pub mod framing;
pub mod logger;
pub mod net;
pub mod protocol;
pub mod protocol_core;
pub mod storage;
pub mod tree;
pub mod world;

pub use error::{ErrorReason, Result, SyncError};
pub use world::WorldName;
