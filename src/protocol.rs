//! Shared protocol constants for the worldsync line protocol

// Maximum control line size, newline included. Applied to every line we emit
// and as the receive limit, so the longest accepted line is MAX_LINE - 2 bytes
// of text plus its terminator.
pub const MAX_LINE: usize = 1024;

// Path-length ceiling for world names and entry paths (exclusive)
pub const PATH_MAX: usize = 4096;

// File bodies move in chunks of this size; not part of the wire format
pub const CHUNK_SIZE: usize = 64 * 1024;

pub const DEFAULT_PORT: u16 = 25570;

// Storage-internal directories live under this prefix inside the storage root.
// World names may not start with it.
pub const RESERVED_PREFIX: &str = ".worldsync-";
pub const STAGING_PREFIX: &str = ".worldsync-stage-";
pub const RETIRED_PREFIX: &str = ".worldsync-old-";

// Control keywords
pub mod keyword {
    pub const PUSH: &str = "PUSH";
    pub const PULL: &str = "PULL";
    pub const LIST: &str = "LIST";
    pub const OK: &str = "OK";
    pub const FOUND: &str = "FOUND";
    pub const DONE: &str = "DONE";
    pub const END: &str = "END";
    pub const COUNT: &str = "COUNT";
    pub const WORLD: &str = "WORLD";
    pub const ENTRY: &str = "ENTRY";
    pub const ERR: &str = "ERR";
}

// Entry kind codes on the wire
pub mod entry_kind {
    pub const FILE: u8 = 1;
    pub const DIRECTORY: u8 = 2;
}

pub mod timeouts {
    // Accept loop poll interval; shutdown is observed at this granularity
    pub const ACCEPT_POLL_MS: u64 = 100;
}
