//! Session configuration.
//!
//! One flat struct constructed at startup and passed by reference into
//! the session — no ambient singletons.

use crate::error::BeamError;

/// Maximum FILE_DATA payload by default (1 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Flow-control resume threshold (512 KiB).
pub const DEFAULT_BUFFERED_LOW: usize = 512 * 1024;

/// Flow-control pause threshold (1 MiB).
pub const DEFAULT_BUFFERED_MAX: usize = 1024 * 1024;

/// Public STUN endpoint used when none is configured.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Everything a session needs to know, validated once at startup.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Maximum FILE_DATA payload in bytes.
    pub chunk_size: usize,

    /// Resume sending once the channel buffer drains below this.
    pub buffered_low: usize,

    /// Pause sending once the channel buffer exceeds this.
    pub buffered_max: usize,

    /// STUN/TURN endpoints handed to the transport.
    pub ice_servers: Vec<String>,

    /// Base URL of the rendezvous store.
    pub rendezvous_url: String,

    /// Bearer credentials for the rendezvous store.
    pub rendezvous_creds: String,
}

impl TransferConfig {
    /// Build a config with default thresholds for the given store.
    pub fn new(rendezvous_url: impl Into<String>, rendezvous_creds: impl Into<String>) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffered_low: DEFAULT_BUFFERED_LOW,
            buffered_max: DEFAULT_BUFFERED_MAX,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            rendezvous_url: rendezvous_url.into(),
            rendezvous_creds: rendezvous_creds.into(),
        }
    }

    /// Check the invariants every other component relies on.
    pub fn validate(&self) -> Result<(), BeamError> {
        if self.chunk_size == 0 {
            return Err(BeamError::Config("chunk_size must be positive".into()));
        }
        if self.buffered_low >= self.buffered_max {
            return Err(BeamError::Config(format!(
                "buffered_low ({}) must be below buffered_max ({})",
                self.buffered_low, self.buffered_max
            )));
        }
        if self.rendezvous_url.is_empty() {
            return Err(BeamError::Config("rendezvous_url is required".into()));
        }
        if self.rendezvous_creds.is_empty() {
            return Err(BeamError::Config("rendezvous_creds is required".into()));
        }
        Ok(())
    }
}
