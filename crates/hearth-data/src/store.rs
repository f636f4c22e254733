//! SQLite implementation of the torrent record store.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use hearth_events::{DiscoveredFile, InfoHash, TorrentState};
use hearth_torrent_core::progress::clamp_fraction;
use hearth_torrent_core::{
    ClientState, FileState, NewTorrent, TorrentFileRecord, TorrentRecord, TorrentRepository,
    TorrentSource,
};

use crate::error::{DataError, Result as DataResult};

const MEMORY_URL: &str = "sqlite::memory:";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TORRENT_COLUMNS: &str = "info_hash, name, size_bytes, progress, state, error_message, \
     source_kind, source_magnet, source_bytes, created_at";

const INSERT_TORRENT_SQL: &str = r"
    INSERT INTO torrents (
        info_hash,
        name,
        size_bytes,
        progress,
        state,
        error_message,
        source_kind,
        source_magnet,
        source_bytes,
        created_at
    )
    VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?, ?)
    RETURNING info_hash, name, size_bytes, progress, state, error_message,
        source_kind, source_magnet, source_bytes, created_at
";

const UPDATE_METADATA_SQL: &str = r"
    UPDATE torrents
    SET
        name = COALESCE(?, name),
        size_bytes = COALESCE(?, size_bytes)
    WHERE info_hash = ?
";

const UPDATE_STATE_SQL: &str = r"
    UPDATE torrents
    SET state = ?, error_message = ?
    WHERE info_hash = ?
";

const CHECKPOINT_PROGRESS_SQL: &str = r"
    UPDATE torrents
    SET progress = MAX(progress, ?)
    WHERE info_hash = ?
    RETURNING progress
";

const DELETE_TORRENT_SQL: &str = "DELETE FROM torrents WHERE info_hash = ?";

const TOTAL_SIZE_SQL: &str = "SELECT COALESCE(SUM(size_bytes), 0) FROM torrents";

const INSERT_FILE_SQL: &str = r"
    INSERT INTO torrent_files (info_hash, path, size_bytes, state, progress)
    VALUES (?, ?, ?, 'downloading', 0)
    ON CONFLICT (info_hash, path) DO NOTHING
";

const SELECT_FILES_SQL: &str = r"
    SELECT id, info_hash, path, size_bytes, state, progress
    FROM torrent_files
    WHERE info_hash = ?
    ORDER BY path
";

const SELECT_FILE_SQL: &str = r"
    SELECT id, info_hash, path, size_bytes, state, progress
    FROM torrent_files
    WHERE id = ?
";

const CHECKPOINT_FILE_SQL: &str = r"
    UPDATE torrent_files
    SET progress = MAX(progress, ?)
    WHERE info_hash = ? AND path = ?
";

const FINISH_FILE_SQL: &str = r"
    UPDATE torrent_files
    SET state = 'finished', progress = 1.0
    WHERE info_hash = ? AND path = ?
";

const DELETE_FILE_SQL: &str = "DELETE FROM torrent_files WHERE id = ?";

const SELECT_CLIENT_STATE_SQL: &str = r"
    SELECT paused, critical_info_hash, download_limit_bps, upload_limit_bps
    FROM client_state
    WHERE id = 1
";

const UPSERT_CLIENT_STATE_SQL: &str = r"
    INSERT INTO client_state (id, paused, critical_info_hash, download_limit_bps, upload_limit_bps)
    VALUES (1, ?, ?, ?, ?)
    ON CONFLICT (id) DO UPDATE
    SET
        paused = excluded.paused,
        critical_info_hash = excluded.critical_info_hash,
        download_limit_bps = excluded.download_limit_bps,
        upload_limit_bps = excluded.upload_limit_bps
";

/// Record store backed by a SQLite database.
#[derive(Clone, Debug)]
pub struct SqliteTorrentStore {
    pool: SqlitePool,
}

impl SqliteTorrentStore {
    /// Open (creating if needed) the database at `url` and apply migrations.
    ///
    /// `sqlite::memory:` URLs are routed to [`Self::in_memory`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed, the database cannot be
    /// opened, or migrations fail.
    pub async fn connect(url: &str) -> DataResult<Self> {
        if url.contains(":memory:") {
            return Self::in_memory().await;
        }
        let connect_failed = |source| DataError::ConnectFailed {
            url: url.to_string(),
            source,
        };
        let options = SqliteConnectOptions::from_str(url)
            .map_err(connect_failed)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| DataError::ConnectFailed {
                url: url.to_string(),
                source,
            })?;
        info!(url, "opened torrent database");
        Self::new(pool).await
    }

    /// Open a private in-memory database. Useful for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or migrated.
    pub async fn in_memory() -> DataResult<Self> {
        let options = SqliteConnectOptions::from_str(MEMORY_URL)
            .map_err(|source| DataError::ConnectFailed {
                url: MEMORY_URL.to_string(),
                source,
            })?
            .foreign_keys(true);
        // Each connection to `:memory:` is its own database; pin a single one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|source| DataError::ConnectFailed {
                url: MEMORY_URL.to_string(),
                source,
            })?;
        Self::new(pool).await
    }

    /// Wrap an existing pool, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn new(pool: SqlitePool) -> DataResult<Self> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_torrents(&self, states: &[TorrentState]) -> DataResult<Vec<TorrentRecord>> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {TORRENT_COLUMNS} FROM torrents"));
        if !states.is_empty() {
            builder.push(" WHERE state IN (");
            let mut separated = builder.separated(", ");
            for state in states {
                separated.push_bind(state.as_str());
            }
            separated.push_unseparated(")");
        }
        builder.push(" ORDER BY created_at DESC, rowid DESC");

        let rows: Vec<TorrentRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::query("list_torrents"))?;
        rows.into_iter().map(TorrentRecord::try_from).collect()
    }
}

#[async_trait]
impl TorrentRepository for SqliteTorrentStore {
    async fn insert_torrent(&self, torrent: &NewTorrent) -> Result<TorrentRecord> {
        let (source_magnet, source_bytes) = match &torrent.source {
            TorrentSource::Magnet { uri } => (Some(uri.as_str()), None),
            TorrentSource::Metainfo { bytes } => (None, Some(bytes.as_slice())),
        };
        let row: TorrentRow = sqlx::query_as(INSERT_TORRENT_SQL)
            .bind(torrent.info_hash.as_str())
            .bind(torrent.name.as_deref())
            .bind(torrent.size_bytes.map(clamp_i64))
            .bind(torrent.state.as_str())
            .bind(torrent.error_message.as_deref())
            .bind(torrent.source.kind())
            .bind(source_magnet)
            .bind(source_bytes)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(DataError::query("insert_torrent"))?;
        debug!(info_hash = %torrent.info_hash, state = %torrent.state, "inserted torrent record");
        Ok(TorrentRecord::try_from(row)?)
    }

    async fn torrent(&self, info_hash: &InfoHash) -> Result<Option<TorrentRecord>> {
        let sql = format!("SELECT {TORRENT_COLUMNS} FROM torrents WHERE info_hash = ?");
        let row: Option<TorrentRow> = sqlx::query_as(&sql)
            .bind(info_hash.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::query("load_torrent"))?;
        Ok(row.map(TorrentRecord::try_from).transpose()?)
    }

    async fn list_torrents(&self, states: &[TorrentState]) -> Result<Vec<TorrentRecord>> {
        Ok(self.fetch_torrents(states).await?)
    }

    async fn update_metadata(
        &self,
        info_hash: &InfoHash,
        name: Option<&str>,
        size_bytes: Option<u64>,
    ) -> Result<()> {
        let result = sqlx::query(UPDATE_METADATA_SQL)
            .bind(name)
            .bind(size_bytes.map(clamp_i64))
            .bind(info_hash.as_str())
            .execute(&self.pool)
            .await
            .map_err(DataError::query("update_metadata"))?;
        ensure_row(result.rows_affected(), "torrents", info_hash)
    }

    async fn update_state(
        &self,
        info_hash: &InfoHash,
        state: TorrentState,
        error_message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(UPDATE_STATE_SQL)
            .bind(state.as_str())
            .bind(error_message)
            .bind(info_hash.as_str())
            .execute(&self.pool)
            .await
            .map_err(DataError::query("update_state"))?;
        ensure_row(result.rows_affected(), "torrents", info_hash)
    }

    async fn checkpoint_progress(&self, info_hash: &InfoHash, progress: f64) -> Result<f64> {
        let stored: Option<f64> = sqlx::query_scalar(CHECKPOINT_PROGRESS_SQL)
            .bind(clamp_fraction(progress))
            .bind(info_hash.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::query("checkpoint_progress"))?;
        stored.ok_or_else(|| {
            DataError::MissingRow {
                table: "torrents",
                key: info_hash.to_string(),
            }
            .into()
        })
    }

    async fn delete_torrent(&self, info_hash: &InfoHash) -> Result<bool> {
        let result = sqlx::query(DELETE_TORRENT_SQL)
            .bind(info_hash.as_str())
            .execute(&self.pool)
            .await
            .map_err(DataError::query("delete_torrent"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn total_size(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar(TOTAL_SIZE_SQL)
            .fetch_one(&self.pool)
            .await
            .map_err(DataError::query("total_size"))?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    async fn upsert_files(&self, info_hash: &InfoHash, files: &[DiscoveredFile]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open file upsert transaction")?;
        for file in files {
            sqlx::query(INSERT_FILE_SQL)
                .bind(info_hash.as_str())
                .bind(file.path.as_str())
                .bind(clamp_i64(file.size_bytes))
                .execute(&mut *tx)
                .await
                .map_err(DataError::query("upsert_files"))?;
        }
        tx.commit()
            .await
            .context("failed to commit file upsert transaction")?;
        Ok(())
    }

    async fn files(&self, info_hash: &InfoHash) -> Result<Vec<TorrentFileRecord>> {
        let rows: Vec<FileRow> = sqlx::query_as(SELECT_FILES_SQL)
            .bind(info_hash.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::query("load_files"))?;
        Ok(rows
            .into_iter()
            .map(TorrentFileRecord::try_from)
            .collect::<DataResult<Vec<_>>>()?)
    }

    async fn file(&self, file_id: i64) -> Result<Option<TorrentFileRecord>> {
        let row: Option<FileRow> = sqlx::query_as(SELECT_FILE_SQL)
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::query("load_file"))?;
        Ok(row.map(TorrentFileRecord::try_from).transpose()?)
    }

    async fn checkpoint_file_progress(
        &self,
        info_hash: &InfoHash,
        path: &str,
        progress: f64,
    ) -> Result<()> {
        sqlx::query(CHECKPOINT_FILE_SQL)
            .bind(clamp_fraction(progress))
            .bind(info_hash.as_str())
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("checkpoint_file_progress"))?;
        Ok(())
    }

    async fn mark_file_finished(&self, info_hash: &InfoHash, path: &str) -> Result<()> {
        sqlx::query(FINISH_FILE_SQL)
            .bind(info_hash.as_str())
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("mark_file_finished"))?;
        Ok(())
    }

    async fn delete_file(&self, file_id: i64) -> Result<bool> {
        let result = sqlx::query(DELETE_FILE_SQL)
            .bind(file_id)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("delete_file"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_client_state(&self) -> Result<ClientState> {
        let row: Option<ClientStateRow> = sqlx::query_as(SELECT_CLIENT_STATE_SQL)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::query("load_client_state"))?;
        Ok(row
            .map(ClientState::try_from)
            .transpose()?
            .unwrap_or_default())
    }

    async fn save_client_state(&self, state: &ClientState) -> Result<()> {
        sqlx::query(UPSERT_CLIENT_STATE_SQL)
            .bind(state.paused)
            .bind(state.critical.as_ref().map(InfoHash::as_str))
            .bind(state.download_limit_bps.map(clamp_i64))
            .bind(state.upload_limit_bps.map(clamp_i64))
            .execute(&self.pool)
            .await
            .map_err(DataError::query("save_client_state"))?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct TorrentRow {
    info_hash: String,
    name: Option<String>,
    size_bytes: Option<i64>,
    progress: f64,
    state: String,
    error_message: Option<String>,
    source_kind: String,
    source_magnet: Option<String>,
    source_bytes: Option<Vec<u8>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TorrentRow> for TorrentRecord {
    type Error = DataError;

    fn try_from(row: TorrentRow) -> DataResult<Self> {
        let source = match (row.source_kind.as_str(), row.source_magnet, row.source_bytes) {
            ("magnet", Some(uri), _) => TorrentSource::Magnet { uri },
            ("metainfo", _, Some(bytes)) => TorrentSource::Metainfo { bytes },
            (kind, ..) => {
                return Err(DataError::CorruptRow {
                    column: "source_kind",
                    value: kind.to_string(),
                });
            }
        };
        Ok(Self {
            info_hash: parse_hash(&row.info_hash)?,
            name: row.name,
            size_bytes: row.size_bytes.map(unclamp_u64),
            progress: clamp_fraction(row.progress),
            state: parse_state(&row.state)?,
            error_message: row.error_message,
            source,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FileRow {
    id: i64,
    info_hash: String,
    path: String,
    size_bytes: i64,
    state: String,
    progress: f64,
}

impl TryFrom<FileRow> for TorrentFileRecord {
    type Error = DataError;

    fn try_from(row: FileRow) -> DataResult<Self> {
        let state = FileState::parse(&row.state).ok_or_else(|| DataError::CorruptRow {
            column: "torrent_files.state",
            value: row.state.clone(),
        })?;
        Ok(Self {
            id: row.id,
            info_hash: parse_hash(&row.info_hash)?,
            path: row.path,
            size_bytes: unclamp_u64(row.size_bytes),
            state,
            progress: clamp_fraction(row.progress),
        })
    }
}

#[derive(Debug, FromRow)]
struct ClientStateRow {
    paused: bool,
    critical_info_hash: Option<String>,
    download_limit_bps: Option<i64>,
    upload_limit_bps: Option<i64>,
}

impl TryFrom<ClientStateRow> for ClientState {
    type Error = DataError;

    fn try_from(row: ClientStateRow) -> DataResult<Self> {
        Ok(Self {
            paused: row.paused,
            critical: row.critical_info_hash.as_deref().map(parse_hash).transpose()?,
            download_limit_bps: row.download_limit_bps.map(unclamp_u64),
            upload_limit_bps: row.upload_limit_bps.map(unclamp_u64),
        })
    }
}

fn parse_hash(raw: &str) -> DataResult<InfoHash> {
    InfoHash::parse(raw).map_err(|_| DataError::CorruptRow {
        column: "info_hash",
        value: raw.to_string(),
    })
}

fn parse_state(raw: &str) -> DataResult<TorrentState> {
    raw.parse().map_err(|_| DataError::CorruptRow {
        column: "state",
        value: raw.to_string(),
    })
}

fn ensure_row(affected: u64, table: &'static str, info_hash: &InfoHash) -> Result<()> {
    if affected == 0 {
        return Err(DataError::MissingRow {
            table,
            key: info_hash.to_string(),
        }
        .into());
    }
    Ok(())
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn unclamp_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}
