//! Data sources that produce snapshots.
//!
//! A [`DataSource`] builds a complete [`Snapshot`] or fails as a whole. It never touches the
//! published store; the refresh path decides what to do with the result.

pub mod postgres;

pub use postgres::PgSource;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::snapshot::Snapshot;

/// Errors produced while building a snapshot.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Could not reach the database.
    #[error("connection error: {0}")]
    Connection(#[source] sqlx::Error),

    /// A query failed.
    #[error("query error on {table}: {source}")]
    Query {
        /// Table (or catalog) being queried.
        table: String,
        /// The driver error.
        #[source]
        source: sqlx::Error,
    },

    /// `load_by_owner` was given an empty owner name.
    #[error("owner's name is empty")]
    EmptyOwner,

    /// The table list file path is empty.
    #[error("table list file path is empty")]
    EmptyListPath,

    /// The table list file could not be read.
    #[error("invalid table list file {}: {source}", path.display())]
    ListFile {
        /// Path of the list file.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The table list file has zero length.
    #[error("table list file {} is empty", .0.display())]
    EmptyListFile(PathBuf),

    /// The source cannot serve requests for any other reason.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Which tables an instance serves. Exactly one mode per instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LoadPolicy {
    /// Every table belonging to this owner.
    ByOwner(String),
    /// The tables named in this file, one per line. The file is re-read on each load.
    ByList(PathBuf),
}

/// Something that can load table contents into a [`Snapshot`].
pub trait DataSource: Send + Sync + 'static {
    /// Loads every table owned by `owner`.
    fn load_by_owner(
        &self,
        owner: &str,
    ) -> impl Future<Output = Result<Snapshot, SourceError>> + Send;

    /// Loads exactly the named tables.
    fn load_by_list(
        &self,
        names: &[String],
    ) -> impl Future<Output = Result<Snapshot, SourceError>> + Send;

    /// Loads according to `policy`. For [`LoadPolicy::ByList`] the list file is read first.
    fn load(
        &self,
        policy: &LoadPolicy,
    ) -> impl Future<Output = Result<Snapshot, SourceError>> + Send {
        async move {
            match policy {
                LoadPolicy::ByOwner(owner) => self.load_by_owner(owner).await,
                LoadPolicy::ByList(path) => {
                    let names = read_table_list(path).await?;
                    self.load_by_list(&names).await
                }
            }
        }
    }
}

/// Reads a table list file: one table name per line.
///
/// Blank lines are skipped and duplicate names collapse; the result is sorted. An empty path, a
/// file that cannot be read, and a zero-length file are all errors.
pub async fn read_table_list(path: &Path) -> Result<Vec<String>, SourceError> {
    if path.as_os_str().is_empty() {
        return Err(SourceError::EmptyListPath);
    }
    let list_err = |source| SourceError::ListFile {
        path: path.to_path_buf(),
        source,
    };

    let text = tokio::fs::read_to_string(path).await.map_err(list_err)?;
    if text.is_empty() {
        return Err(SourceError::EmptyListFile(path.to_path_buf()));
    }

    let names: BTreeSet<&str> = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .collect();
    debug!(path = %path.display(), tables = names.len(), "read table list");
    Ok(names.into_iter().map(str::to_owned).collect())
}
