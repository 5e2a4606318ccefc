//! Error taxonomy for backvault.
//!
//! Most failures inside a run are expected outcomes (a missing file during
//! the cyclic pass, a permission-denied stat) and are modeled as plain
//! `Result`/enum values at the call site rather than through this type.
//! `Error` exists for the boundary cases spec.md §7 calls fatal: config
//! parsing, catalog open/schema, and pipeline spawn failures.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("failed to open catalog at {path:?}: {source}")]
    CatalogOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("catalog row operation failed: {0}")]
    CatalogRow(rusqlite::Error),

    #[error("failed to spawn {role} process {program:?}: {source}")]
    PipelineSpawn {
        role: &'static str,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
