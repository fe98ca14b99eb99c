//! PostgreSQL data source.

use std::time::SystemTime;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Executor as _, PgConnection, Row as _};
use tracing::{debug, instrument};

use super::{DataSource, SourceError};
use crate::snapshot::{Entry, EntryMeta, RowEncoder, Snapshot};

// Loads run one after another, so a couple of connections is plenty.
const MAX_CONNECTIONS: u32 = 2;

const LIST_BY_OWNER: &str =
    "select tablename::text from pg_tables where tableowner = $1 order by tablename";

/// Loads tables from a PostgreSQL database.
///
/// Every load runs inside one read-only, repeatable-read transaction, so all tables of a snapshot
/// come from the same database state. Values are fetched over the simple query protocol and
/// therefore arrive in the server's text rendering.
#[derive(Debug, Clone)]
pub struct PgSource {
    pool: PgPool,
    owner: (u32, u32),
}

impl PgSource {
    /// Connects to the database. Table files are owned by `owner` (`(uid, gid)`).
    pub async fn connect(options: PgConnectOptions, owner: (u32, u32)) -> Result<Self, SourceError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(SourceError::Connection)?;
        Ok(Self::with_pool(pool, owner))
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn with_pool(pool: PgPool, owner: (u32, u32)) -> Self {
        Self { pool, owner }
    }

    /// Closes the pool, waiting for checked-out connections to come back.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[instrument(name = "PgSource::load_tables", skip(self, names), fields(tables = names.len()))]
    async fn load_tables(&self, names: &[String]) -> Result<Snapshot, SourceError> {
        let mut tx = self.pool.begin().await.map_err(SourceError::Connection)?;
        (&mut *tx)
            .execute(sqlx::raw_sql("set transaction isolation level repeatable read, read only"))
            .await
            .map_err(|source| SourceError::Query {
                table: String::new(),
                source,
            })?;

        let mut builder = Snapshot::builder();
        for name in names {
            builder.insert(self.load_table(&mut tx, name).await?);
        }
        // Nothing was written; committing just returns the connection cleanly.
        tx.commit().await.map_err(SourceError::Connection)?;
        Ok(builder.build())
    }

    async fn load_table(&self, conn: &mut PgConnection, name: &str) -> Result<Entry, SourceError> {
        let query_err = |source| SourceError::Query {
            table: name.to_owned(),
            source,
        };
        let sql = format!("select * from {}", quote_ident(name));
        let rows = conn
            .fetch_all(sqlx::raw_sql(&sql))
            .await
            .map_err(query_err)?;

        let mut encoder = RowEncoder::new();
        for row in &rows {
            let fields = (0..row.len())
                .map(|i| row.try_get_unchecked::<Option<&str>, _>(i))
                .collect::<Result<Vec<_>, _>>()
                .map_err(query_err)?;
            encoder.push_row(fields);
        }
        let (row_count, content) = encoder.finish();
        debug!(table = name, rows = row_count, bytes = content.len(), "loaded table");

        let meta = EntryMeta::table_file(self.owner.0, self.owner.1, SystemTime::now());
        Ok(Entry::new(name, row_count, content, meta))
    }
}

impl DataSource for PgSource {
    #[instrument(name = "PgSource::load_by_owner", skip(self))]
    async fn load_by_owner(&self, owner: &str) -> Result<Snapshot, SourceError> {
        if owner.is_empty() {
            return Err(SourceError::EmptyOwner);
        }
        let names: Vec<String> = sqlx::query_scalar(LIST_BY_OWNER)
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| SourceError::Query {
                table: "pg_tables".to_owned(),
                source,
            })?;
        debug!(owner, tables = names.len(), "listed tables by owner");
        self.load_tables(&names).await
    }

    async fn load_by_list(&self, names: &[String]) -> Result<Snapshot, SourceError> {
        self.load_tables(names).await
    }
}

/// Quotes a possibly schema-qualified table name for interpolation into SQL.
///
/// Each dot-separated part becomes a quoted identifier with embedded quotes doubled, so a name is
/// matched exactly (case included) and cannot inject SQL.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}
