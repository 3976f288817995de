//! Error and Result types.

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::time::Duration;

use crate::protocol::response::ErrPacket;

/// A specialized `Result` type for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Convenience alias for use on errors which can be boxed.
pub type BoxDynError = Box<dyn StdError + Send + Sync + 'static>;

/// Represents all the ways a method can fail within the driver.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Error occurred while parsing a connection string or applying
    /// configuration.
    #[error("error with configuration: {0}")]
    Configuration(#[source] BoxDynError),

    /// Error communicating with the database server.
    #[error("error communicating with the server: {0}")]
    Io(#[from] io::Error),

    /// Error occurred while attempting to establish a TLS connection.
    #[error("error during TLS upgrade: {0}")]
    Tls(#[source] BoxDynError),

    /// Unexpected or invalid data encountered while communicating with the
    /// server. This indicates a bug on either side of the wire, or data
    /// corruption in transit; the connection is no longer usable.
    #[error("encountered unexpected or invalid data: {0}")]
    Protocol(String),

    /// The server rejected our authentication attempt, the selected plugin
    /// cannot run on this channel, or the handshake took an unexpected turn.
    #[error("error during authentication: {0}")]
    Auth(String),

    /// The server requested an authentication plugin the driver does not
    /// know and no external plugin was registered under that name.
    #[error("unknown authentication plugin: {0}")]
    UnknownAuthPlugin(String),

    /// An error returned from the database server.
    #[error("{0}")]
    Database(Box<MySqlDatabaseError>),

    /// A network operation did not complete within the configured limit.
    #[error("operation `{0}` timed out")]
    Timeout(&'static str),

    /// [`Pool::acquire`][crate::pool::Pool::acquire] timed out waiting for
    /// a connection to become available.
    #[error(
        "timed out after {after:?} waiting for an open connection ({status})"
    )]
    PoolTimedOut {
        after: Duration,
        status: PoolStatus,
    },

    /// [`Pool::close`][crate::pool::Pool::close] was called while we were
    /// waiting in [`Pool::acquire`][crate::pool::Pool::acquire].
    #[error("attempted to acquire a connection on a closed pool")]
    PoolClosed,

    /// The pool's circuit breaker is open: recent attempts to open new
    /// connections failed and the pool is refusing to try again yet.
    #[error("connection circuit breaker is open; retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// The requested operation depends on a capability the server did not
    /// advertise.
    #[error("unsupported by the server: {0}")]
    Unsupported(String),

    /// A column value could not be converted to the requested Rust type.
    #[error("error decoding column {index}: {source}")]
    ColumnDecode {
        index: String,

        #[source]
        source: BoxDynError,
    },

    /// Column was not found by name in the row.
    #[error("no column found with the name {0:?}")]
    ColumnNotFound(Box<str>),

    /// Column index was out of bounds.
    #[error("column index out of bounds: the len is {len}, but the index is {index}")]
    ColumnIndexOutOfBounds { index: usize, len: usize },
}

impl Error {
    pub(crate) fn config(err: impl StdError + Send + Sync + 'static) -> Self {
        Error::Configuration(err.into())
    }

    pub(crate) fn tls(err: impl StdError + Send + Sync + 'static) -> Self {
        Error::Tls(err.into())
    }

    /// Returns `true` if this error leaves the connection in an unusable
    /// state.
    ///
    /// Transient network failures, protocol desynchronization, and fatal
    /// server conditions all poison the connection; it must be discarded
    /// rather than returned to a pool.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Io(_) | Error::Tls(_) | Error::Protocol(_) | Error::Timeout(_) => true,
            Error::Database(err) => err.is_fatal(),
            _ => false,
        }
    }
}

impl From<ErrPacket> for Error {
    fn from(err: ErrPacket) -> Self {
        Error::Database(Box::new(MySqlDatabaseError(err)))
    }
}

/// An error returned from the MySQL server, carried through verbatim.
pub struct MySqlDatabaseError(pub(crate) ErrPacket);

impl MySqlDatabaseError {
    /// The [SQLSTATE](https://dev.mysql.com/doc/refman/8.0/en/server-error-reference.html)
    /// code for this error.
    pub fn sql_state(&self) -> Option<&str> {
        self.0.sql_state.as_deref()
    }

    /// The vendor-specific error code.
    pub fn code(&self) -> u16 {
        self.0.error_code
    }

    /// The human-readable error message.
    pub fn message(&self) -> &str {
        &self.0.error_message
    }

    /// Whether the server condition invalidates the connection itself,
    /// rather than just the statement that provoked it.
    pub fn is_fatal(&self) -> bool {
        // ER_SERVER_SHUTDOWN, ER_ABORTING_CONNECTION, ER_NET_READ_ERROR,
        // ER_NET_WRITE_INTERRUPTED and the 08xxx (connection exception)
        // SQLSTATE class
        matches!(self.code(), 1053 | 1152 | 1158 | 1160 | 1927)
            || matches!(self.sql_state(), Some(state) if state.starts_with("08"))
    }
}

impl fmt::Debug for MySqlDatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlDatabaseError")
            .field("code", &self.code())
            .field("sql_state", &self.sql_state())
            .field("message", &self.message())
            .finish()
    }
}

impl Display for MySqlDatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.sql_state() {
            Some(state) => write!(f, "{} ({}): {}", self.code(), state, self.message()),
            None => write!(f, "{}: {}", self.code(), self.message()),
        }
    }
}

impl StdError for MySqlDatabaseError {}

/// A point-in-time description of a pool, included in acquisition timeout
/// errors for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Total connections currently owned by the pool.
    pub size: u32,
    /// Connections currently idle in the pool.
    pub idle: usize,
    /// Acquisitions currently waiting for a connection.
    pub waiters: usize,
}

impl Display for PoolStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size: {}, idle: {}, waiters: {}",
            self.size, self.idle, self.waiters
        )
    }
}

macro_rules! err_protocol {
    ($expr:expr) => {
        $crate::error::Error::Protocol($expr.into())
    };

    ($fmt:expr, $($arg:tt)+) => {
        $crate::error::Error::Protocol(format!($fmt, $($arg)+))
    };
}

macro_rules! err_auth {
    ($expr:expr) => {
        $crate::error::Error::Auth($expr.into())
    };

    ($fmt:expr, $($arg:tt)+) => {
        $crate::error::Error::Auth(format!($fmt, $($arg)+))
    };
}
