use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SqlTransportErrorKind {
    Connect,
    Io,
    Tls,
    PoolTimeout,
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server accepted the statement and reported an error executing it.
    #[error("sql statement failed: {0}")]
    Statement(String),

    #[error("sql connection failed: {0}")]
    Connect(String),

    #[error("sql io error: {0}")]
    Io(String),

    #[error("sql tls error: {0}")]
    Tls(String),

    #[error("sql pool exhausted")]
    PoolTimeout,

    #[error("sql call timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// `None` means the database itself answered (a protocol failure);
    /// `Some(kind)` means we never got a well-formed answer (transport).
    #[must_use]
    pub fn transport_error_kind(&self) -> Option<SqlTransportErrorKind> {
        match self {
            Self::Statement(_) => None,
            Self::Connect(_) => Some(SqlTransportErrorKind::Connect),
            Self::Io(_) => Some(SqlTransportErrorKind::Io),
            Self::Tls(_) => Some(SqlTransportErrorKind::Tls),
            Self::PoolTimeout => Some(SqlTransportErrorKind::PoolTimeout),
            Self::Timeout(_) => Some(SqlTransportErrorKind::Timeout),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => Self::Statement(db.to_string()),
            sqlx::Error::RowNotFound | sqlx::Error::TypeNotFound { .. } => {
                Self::Statement(err_string(&err))
            }
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::Io(io) => Self::Io(io.to_string()),
            sqlx::Error::Tls(tls) => Self::Tls(tls.to_string()),
            sqlx::Error::Configuration(e) => Self::Connect(e.to_string()),
            other => Self::Connect(other.to_string()),
        }
    }
}

fn err_string(err: &sqlx::Error) -> String {
    err.to_string()
}
