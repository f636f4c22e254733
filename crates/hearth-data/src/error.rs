//! Error types for the record store.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Result alias for record store operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised by the record store.
#[derive(Debug)]
pub enum DataError {
    /// Opening the database failed.
    ConnectFailed {
        /// Connection URL, as configured.
        url: String,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// Migration execution failed.
    MigrationFailed {
        /// Underlying migration error.
        source: sqlx::migrate::MigrateError,
    },
    /// A database operation failed.
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// An update targeted a row that does not exist.
    MissingRow {
        /// Table that was updated.
        table: &'static str,
        /// Key that matched nothing.
        key: String,
    },
    /// A stored value could not be mapped back to a domain type.
    CorruptRow {
        /// Column holding the bad value.
        column: &'static str,
        /// Offending value.
        value: String,
    },
}

impl DataError {
    pub(crate) fn query(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::QueryFailed { operation, source }
    }
}

impl Display for DataError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed { .. } => formatter.write_str("failed to open database"),
            Self::MigrationFailed { .. } => formatter.write_str("migration failed"),
            Self::QueryFailed { .. } => formatter.write_str("database operation failed"),
            Self::MissingRow { .. } => formatter.write_str("no row matched the update"),
            Self::CorruptRow { .. } => formatter.write_str("stored value is invalid"),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ConnectFailed { source, .. } | Self::QueryFailed { source, .. } => Some(source),
            Self::MigrationFailed { source } => Some(source),
            Self::MissingRow { .. } | Self::CorruptRow { .. } => None,
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DataError {
    fn from(source: sqlx::migrate::MigrateError) -> Self {
        Self::MigrationFailed { source }
    }
}
