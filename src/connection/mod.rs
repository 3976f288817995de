//! A single established connection to the server.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use hashlink::lru_cache::LruCache;

use crate::error::{Error, Result};
use crate::options::MySqlConnectOptions;
use crate::protocol::text::{InitDb, Ping, Quit, ResetConnection, SetOption, Statistics};
use crate::protocol::Capabilities;
use crate::row::MySqlColumn;

mod establish;
mod executor;
mod statement;
mod stream;

pub use executor::{MySqlQueryResult, QueryResults};
pub use statement::MySqlStatement;
pub(crate) use stream::{Busy, MySqlStream};

pub(crate) const COLLATE_UTF8MB4_UNICODE_CI: u8 = 224;

pub(crate) const MAX_PACKET_SIZE: u32 = 1024;

/// The transaction isolation level, mirrored to the server when changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

// session options that are mirrored on the server and must be restored to
// their defaults before a pooled connection can be reused
#[derive(Debug, Clone)]
pub(crate) struct SessionState {
    pub(crate) auto_commit: bool,
    pub(crate) read_only: bool,
    pub(crate) isolation_level: Option<IsolationLevel>,
    pub(crate) schema: Option<String>,
}

impl SessionState {
    fn is_default(&self) -> bool {
        self.auto_commit && !self.read_only && self.isolation_level.is_none()
    }
}

/// A connection to a MySQL-compatible database server.
pub struct MySqlConnection {
    pub(crate) stream: MySqlStream,

    pub(crate) connection_id: u32,
    pub(crate) server_version: String,

    // the capability set the *server* advertised, before intersection;
    // consulted for features toggled after the handshake (COM_SET_OPTION)
    pub(crate) server_capabilities: Capabilities,

    // cache from query string to prepared statement
    pub(crate) cache_statement: LruCache<String, MySqlStatement>,

    // working memory for the active result set's column metadata; reused
    // across rows unless the caller holds a row past the next query
    pub(crate) scratch_row_columns: Arc<Vec<MySqlColumn>>,
    pub(crate) scratch_row_column_names: Arc<HashMap<String, usize>>,

    pub(crate) session: SessionState,

    // the database named at connect time; selecting another one is session
    // state that a pool reset must undo
    pub(crate) connect_database: Option<String>,

    pub(crate) use_cursor_fetch: bool,
    pub(crate) cursor_fetch_size: u32,
    pub(crate) collation: u8,
}

impl Debug for MySqlConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("connection_id", &self.connection_id)
            .field("server_version", &self.server_version)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Establish a connection from a `mysql://` URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = MySqlConnectOptions::from_str(url)?;
        Self::connect_with(&options).await
    }

    /// Establish a connection with explicit options.
    pub async fn connect_with(options: &MySqlConnectOptions) -> Result<Self> {
        let connect = Self::establish(options);

        let mut conn = tokio::time::timeout(options.connect_timeout, connect)
            .await
            .map_err(|_| Error::Timeout("connect"))??;

        // Establish a baseline for the session:
        //
        // PIPES_AS_CONCAT - "A" || "B" means CONCAT, not OR.
        // NO_ENGINE_SUBSTITUTION - error instead of silently swapping the
        //                          storage engine on CREATE TABLE.
        // NO_ZERO_DATE / NO_ZERO_IN_DATE - '0000-00-00' is not a date.
        // https://mariadb.com/kb/en/sql-mode/

        let mut sql_mode = String::from(",PIPES_AS_CONCAT,NO_ZERO_DATE,NO_ZERO_IN_DATE");

        if options.no_engine_substitution {
            sql_mode.push_str(",NO_ENGINE_SUBSTITUTION");
        }

        conn.execute(&format!(
            "SET sql_mode=(SELECT CONCAT(@@sql_mode, '{}'))",
            sql_mode
        ))
        .await?;

        // lets us assume that the output from a TIMESTAMP field is UTC

        conn.execute("SET time_zone = '+00:00'").await?;

        // https://mathiasbynens.be/notes/mysql-utf8mb4

        if options.set_names {
            conn.execute(&format!(
                "SET NAMES {} COLLATE {}",
                options.charset,
                options.collation.as_deref().unwrap_or("utf8mb4_unicode_ci"),
            ))
            .await?;
        }

        Ok(conn)
    }

    /// The thread (connection) id assigned by the server.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// The server's version banner, e.g. `8.0.34`.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Checks the server is alive and the connection usable.
    ///
    /// An ERR reply is reported as `Ok(false)` rather than an error; only
    /// transport failures error.
    pub async fn ping(&mut self) -> Result<bool> {
        self.stream.wait_until_ready().await?;
        self.stream.send_packet(Ping).await?;

        let payload = self.stream.recv_packet().await?;

        Ok(payload[0] != 0xff)
    }

    /// Requests the server's human-readable statistics string.
    ///
    /// The reply is a single free-form packet, not OK/ERR framed.
    pub async fn statistics(&mut self) -> Result<String> {
        self.stream.wait_until_ready().await?;
        self.stream.send_packet(Statistics).await?;

        let payload = self.stream.recv_packet().await?;

        String::from_utf8(payload.to_vec())
            .map_err(|err| err_protocol!("statistics string is not UTF-8: {}", err))
    }

    /// Changes the default schema for the connection.
    pub async fn select_database(&mut self, database: &str) -> Result<()> {
        self.stream.wait_until_ready().await?;
        self.stream.send_packet(InitDb(database)).await?;
        self.stream.recv_ok().await?;

        self.session.schema = Some(database.to_owned());

        Ok(())
    }

    /// Enables or disables multi-statement support for `COM_QUERY`.
    ///
    /// Off by default; requires server support for the option.
    pub async fn set_multi_statements(&mut self, on: bool) -> Result<()> {
        if !self
            .server_capabilities
            .contains(Capabilities::MULTI_STATEMENTS)
        {
            return Err(Error::Unsupported(
                "server does not support multi-statement execution".into(),
            ));
        }

        self.stream.wait_until_ready().await?;
        self.stream
            .send_packet(if on {
                SetOption::MultiStatementsOn
            } else {
                SetOption::MultiStatementsOff
            })
            .await?;

        // the server replies with EOF (or the OK that replaces it)
        let payload = self.stream.recv_packet().await?;
        self.stream.maybe_err(&payload)?;
        self.stream.handle_eof_packet(payload)?;

        Ok(())
    }

    /// Sets autocommit on or off, mirrored on the server immediately.
    pub async fn set_auto_commit(&mut self, on: bool) -> Result<()> {
        if self.session.auto_commit != on {
            self.execute(if on { "SET autocommit=1" } else { "SET autocommit=0" })
                .await?;
            self.session.auto_commit = on;
        }

        Ok(())
    }

    /// Marks the session read-only (or read-write), mirrored on the server.
    pub async fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        if self.session.read_only != read_only {
            self.execute(if read_only {
                "SET SESSION TRANSACTION READ ONLY"
            } else {
                "SET SESSION TRANSACTION READ WRITE"
            })
            .await?;
            self.session.read_only = read_only;
        }

        Ok(())
    }

    /// Sets the transaction isolation level for subsequent transactions.
    pub async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()> {
        if self.session.isolation_level != Some(level) {
            self.execute(&format!(
                "SET SESSION TRANSACTION ISOLATION LEVEL {}",
                level.as_sql()
            ))
            .await?;
            self.session.isolation_level = Some(level);
        }

        Ok(())
    }

    /// Restore the session to its post-connect defaults so the connection
    /// can be handed to another caller.
    ///
    /// Uses `COM_RESET_CONNECTION`, which clears user variables, temporary
    /// tables, and session flags in one round trip, then re-selects the
    /// connect-time database if the caller had moved away from it.
    pub(crate) async fn reset_session(&mut self) -> Result<()> {
        if self.stream.poisoned {
            return Err(err_protocol!(
                "connection was invalidated by a fatal server error"
            ));
        }

        self.stream.wait_until_ready().await?;

        if self.session.is_default() && self.session.schema == self.connect_database {
            return Ok(());
        }

        self.stream.send_packet(ResetConnection).await?;
        self.stream.recv_ok().await?;

        // server-side prepared statements are dropped by the reset
        self.cache_statement.clear();

        if self.session.schema != self.connect_database {
            if let Some(database) = self.connect_database.clone() {
                self.select_database(&database).await?;
            }
        }

        self.session = SessionState {
            auto_commit: true,
            read_only: false,
            isolation_level: None,
            schema: self.connect_database.clone(),
        };

        Ok(())
    }

    /// Gracefully terminate the connection.
    pub async fn close(mut self) -> Result<()> {
        self.stream.wait_until_ready().await?;
        self.stream.send_packet(Quit).await?;
        self.stream.shutdown().await?;

        Ok(())
    }
}
