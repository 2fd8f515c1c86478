use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ScopeId, ServiceId};

/// Failures of the port prober. None of these abort a run; they end up as log lines.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Nmap binary not found.")]
    ToolUnavailable,

    #[error("failed to launch {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed reading scanner output: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("service {ip}:{port} already exists in profile {scope_id}")]
    Duplicate {
        scope_id: ScopeId,
        ip: String,
        port: u16,
    },

    #[error("service {0} not found")]
    NotFound(ServiceId),

    #[error("catalog connection lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("a scan of {target} is already running")]
    AlreadyRunning { target: String },

    #[error("invalid scan target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("no scan is running")]
    NotRunning,

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
