use crate::connection::MySqlConnection;
use crate::error::Result;
use crate::io::ProtocolDecode;
use crate::protocol::statement::{Prepare, PrepareOk, StmtClose};
use crate::protocol::ColumnDefinition;
use crate::row::MySqlColumn;
use crate::value::MySqlTypeInfo;

/// Metadata for a statement prepared on the server: its id, the types of
/// its `?` placeholders, and the columns it will produce.
#[derive(Debug, Clone)]
pub struct MySqlStatement {
    pub(crate) statement_id: u32,
    pub(crate) parameters: Vec<MySqlTypeInfo>,
    pub(crate) columns: Vec<MySqlColumn>,
}

impl MySqlStatement {
    pub fn statement_id(&self) -> u32 {
        self.statement_id
    }

    /// Type information for each `?` placeholder, in order.
    pub fn parameters(&self) -> &[MySqlTypeInfo] {
        &self.parameters
    }

    pub fn columns(&self) -> &[MySqlColumn] {
        &self.columns
    }
}

impl MySqlConnection {
    /// Prepare a statement, returning its metadata.
    ///
    /// Statements are cached per-connection by query string (LRU); a cache
    /// hit costs no round trip, and eviction closes the statement on the
    /// server.
    pub async fn prepare_statement(&mut self, sql: &str) -> Result<MySqlStatement> {
        self.stream.wait_until_ready().await?;
        Ok(self.prepare(sql).await?.clone())
    }

    pub(crate) async fn prepare(&mut self, sql: &str) -> Result<&MySqlStatement> {
        if !self.cache_statement.contains_key(sql) {
            let statement = self.prepare_uncached(sql).await?;

            // in case of the cache being full, close the least recently
            // used statement on the server before forgetting it
            if self.cache_statement.len() >= self.cache_statement.capacity() {
                if let Some((_, evicted)) = self.cache_statement.remove_lru() {
                    // fire-and-forget: COM_STMT_CLOSE has no response
                    self.stream
                        .send_packet(StmtClose {
                            statement_id: evicted.statement_id,
                        })
                        .await?;
                }
            }

            self.cache_statement.insert(sql.to_owned(), statement);
        }

        // just inserted or already present
        Ok(self.cache_statement.get(sql).unwrap())
    }

    async fn prepare_uncached(&mut self, sql: &str) -> Result<MySqlStatement> {
        // https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_stmt_prepare.html

        self.stream.send_packet(Prepare { query: sql }).await?;

        let payload = self.stream.recv_packet().await?;
        self.stream.maybe_err(&payload)?;

        let ok = PrepareOk::decode(payload)?;

        let mut parameters = Vec::with_capacity(ok.params as usize);
        let mut columns = Vec::with_capacity(ok.columns as usize);

        if ok.params > 0 {
            for _ in 0..ok.params {
                let payload = self.stream.recv_packet().await?;
                self.stream.maybe_err(&payload)?;

                let def = ColumnDefinition::decode(payload)?;
                parameters.push(MySqlTypeInfo::from_column(&def));
            }

            self.stream.maybe_recv_eof().await?;
        }

        if ok.columns > 0 {
            for ordinal in 0..(ok.columns as usize) {
                let payload = self.stream.recv_packet().await?;
                self.stream.maybe_err(&payload)?;

                let def = ColumnDefinition::decode(payload)?;
                columns.push(MySqlColumn::from_definition(ordinal, &def));
            }

            self.stream.maybe_recv_eof().await?;
        }

        Ok(MySqlStatement {
            statement_id: ok.statement_id,
            parameters,
            columns,
        })
    }
}
