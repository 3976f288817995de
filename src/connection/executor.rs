use std::sync::Arc;

use bytes::Bytes;
use either::Either;

use crate::arguments::MySqlArguments;
use crate::connection::{Busy, MySqlConnection};
use crate::error::{Error, Result};
use crate::io::{BufExt, ProtocolDecode};
use crate::protocol::statement::{BinaryRow, CursorFlags, Execute, Fetch};
use crate::protocol::text::{Query, TextRow};
use crate::protocol::{Capabilities, ColumnDefinition, Status};
use crate::row::{MySqlColumn, MySqlRow};
use crate::value::{MySqlTypeInfo, MySqlValueFormat};

/// The summary returned when a statement produces no rows (or at the end of
/// each result set).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MySqlQueryResult {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum ResultsState {
    // expecting ColumnCount | OK | ERR | LOCAL INFILE
    ResultHead,

    // streaming rows inline
    Rows,

    // a server-side cursor is open and idle; a fetch must be issued
    CursorIdle,

    // streaming rows produced by the last COM_STMT_FETCH
    CursorRows,

    Done,
}

/// An in-progress result stream.
///
/// Call [`next`][Self::next] until it returns `None`. Each result set ends
/// with a [`MySqlQueryResult`] on the `Left`; rows arrive on the `Right`.
/// Dropping this mid-stream is safe: the connection drains the remainder
/// before its next command.
#[must_use = "results do nothing unless iterated"]
pub struct QueryResults<'c> {
    conn: &'c mut MySqlConnection,
    format: MySqlValueFormat,
    state: ResultsState,

    // set when rows come through a server-side cursor
    statement_id: Option<u32>,
    fetch_size: u32,

    // the active result set's column types, for binary row decoding
    types: Vec<MySqlTypeInfo>,
}

impl MySqlConnection {
    /// Executes the SQL over the text protocol.
    ///
    /// The first reply packet is one of `ColumnCount`, OK, or ERR; `LOCAL
    /// INFILE` requests are refused.
    pub async fn query(&mut self, sql: &str) -> Result<QueryResults<'_>> {
        self.stream.wait_until_ready().await?;
        self.stream.busy = Busy::Result;
        self.stream.send_packet(Query(sql)).await?;

        Ok(QueryResults {
            conn: self,
            format: MySqlValueFormat::Text,
            state: ResultsState::ResultHead,
            statement_id: None,
            fetch_size: 0,
            types: Vec::new(),
        })
    }

    /// Prepares (or fetches from cache) and executes the statement with the
    /// given parameters over the binary protocol.
    pub async fn query_with(
        &mut self,
        sql: &str,
        arguments: MySqlArguments,
    ) -> Result<QueryResults<'_>> {
        self.stream.wait_until_ready().await?;

        let (statement_id, has_columns) = {
            let statement = self.prepare(sql).await?;
            (statement.statement_id(), !statement.columns().is_empty())
        };

        // a server-side cursor only helps when the statement returns rows
        let use_cursor = self.use_cursor_fetch && has_columns;

        self.stream.busy = Busy::Result;
        self.stream
            .send_packet(Execute {
                statement_id,
                cursor: if use_cursor {
                    CursorFlags::READ_ONLY
                } else {
                    CursorFlags::NO_CURSOR
                },
                arguments: &arguments,
            })
            .await?;

        let fetch_size = self.cursor_fetch_size;

        Ok(QueryResults {
            conn: self,
            format: MySqlValueFormat::Binary,
            state: ResultsState::ResultHead,
            statement_id: use_cursor.then_some(statement_id),
            fetch_size,
            types: Vec::new(),
        })
    }

    /// Executes the SQL and returns the affected-row count, discarding any
    /// rows.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        let mut results = self.query(sql).await?;
        let mut rows_affected = 0;

        while let Some(step) = results.next().await? {
            if let Either::Left(result) = step {
                rows_affected += result.rows_affected;
            }
        }

        Ok(rows_affected)
    }

    /// Executes a prepared statement and returns the affected-row count,
    /// discarding any rows.
    pub async fn execute_with(&mut self, sql: &str, arguments: MySqlArguments) -> Result<u64> {
        let mut results = self.query_with(sql, arguments).await?;
        let mut rows_affected = 0;

        while let Some(step) = results.next().await? {
            if let Either::Left(result) = step {
                rows_affected += result.rows_affected;
            }
        }

        Ok(rows_affected)
    }

    /// Executes the SQL and collects every returned row.
    pub async fn fetch_all(&mut self, sql: &str) -> Result<Vec<MySqlRow>> {
        let mut results = self.query(sql).await?;
        let mut rows = Vec::new();

        while let Some(step) = results.next().await? {
            if let Either::Right(row) = step {
                rows.push(row);
            }
        }

        Ok(rows)
    }

    /// Executes a prepared statement and collects every returned row.
    pub async fn fetch_all_with(
        &mut self,
        sql: &str,
        arguments: MySqlArguments,
    ) -> Result<Vec<MySqlRow>> {
        let mut results = self.query_with(sql, arguments).await?;
        let mut rows = Vec::new();

        while let Some(step) = results.next().await? {
            if let Either::Right(row) = step {
                rows.push(row);
            }
        }

        Ok(rows)
    }

    /// Executes a prepared statement and returns at most one row, draining
    /// the rest.
    pub async fn fetch_optional_with(
        &mut self,
        sql: &str,
        arguments: MySqlArguments,
    ) -> Result<Option<MySqlRow>> {
        let mut results = self.query_with(sql, arguments).await?;
        let mut first = None;

        while let Some(step) = results.next().await? {
            if let Either::Right(row) = step {
                if first.is_none() {
                    first = Some(row);
                }
            }
        }

        Ok(first)
    }

    // the result-set metadata is primarily a listing of each output column
    async fn recv_result_metadata(&mut self, head: Bytes) -> Result<()> {
        let mut head = head;
        let column_count = head
            .get_uint_lenenc()?
            .ok_or_else(|| err_protocol!("unexpected NULL column count"))?
            as usize;

        let columns = Arc::make_mut(&mut self.scratch_row_columns);
        let column_names = Arc::make_mut(&mut self.scratch_row_column_names);

        columns.clear();
        column_names.clear();

        for ordinal in 0..column_count {
            let payload = self.stream.recv_packet().await?;
            self.stream.maybe_err(&payload)?;

            let def = ColumnDefinition::decode(payload)?;
            let column = MySqlColumn::from_definition(ordinal, &def);

            if let Some(name) = column.name() {
                column_names.insert(name.to_owned(), ordinal);
            }

            columns.push(column);
        }

        self.stream.maybe_recv_eof().await?;

        Ok(())
    }

    fn row_types(&self) -> Vec<MySqlTypeInfo> {
        self.scratch_row_columns
            .iter()
            .map(|column| column.type_info.clone())
            .collect()
    }
}

impl QueryResults<'_> {
    /// Advance the stream: the next row, the end-of-result summary, or
    /// `None` once every result set is drained.
    pub async fn next(&mut self) -> Result<Option<Either<MySqlQueryResult, MySqlRow>>> {
        loop {
            match self.state {
                ResultsState::Done => return Ok(None),

                ResultsState::ResultHead => {
                    let payload = self.conn.stream.recv_packet().await?;
                    self.conn.stream.maybe_err(&payload)?;

                    match payload[0] {
                        0x00 => {
                            let ok = crate::protocol::response::OkPacket::decode(payload)?;
                            self.conn.stream.server_status = ok.status;

                            if ok.status.contains(Status::SERVER_MORE_RESULTS_EXISTS) {
                                self.state = ResultsState::ResultHead;
                            } else {
                                self.conn.stream.busy = Busy::NotBusy;
                                self.state = ResultsState::Done;
                            }

                            return Ok(Some(Either::Left(MySqlQueryResult {
                                rows_affected: ok.affected_rows,
                                last_insert_id: ok.last_insert_id,
                            })));
                        }

                        0xfb => {
                            // LOCAL INFILE request: decline by sending the
                            // empty terminator, then consume the server's
                            // response to keep the exchange balanced
                            self.conn.stream.write_packet(&[][..]);
                            self.conn.stream.flush().await?;

                            let reply = self.conn.stream.recv_packet().await?;
                            self.conn.stream.busy = Busy::NotBusy;
                            self.state = ResultsState::Done;

                            // surface the server's error if it sent one
                            self.conn.stream.maybe_err(&reply)?;

                            return Err(Error::Unsupported(
                                "LOCAL INFILE requests are not supported".into(),
                            ));
                        }

                        _ => {
                            // column count; metadata follows
                            self.conn.stream.busy = Busy::Row;
                            self.conn.recv_result_metadata(payload).await?;

                            if self.format == MySqlValueFormat::Binary {
                                self.types = self.conn.row_types();
                            }

                            // under the legacy protocol a cursor-mode
                            // response ends right here: the metadata EOF
                            // (consumed above) carries CURSOR_EXISTS and no
                            // rows follow. Under DEPRECATE_EOF the
                            // terminator, if any, arrives as the next
                            // packet and the row loop below handles it.
                            let cursor_open = self.statement_id.is_some()
                                && !self
                                    .conn
                                    .stream
                                    .capabilities
                                    .contains(Capabilities::DEPRECATE_EOF)
                                && self
                                    .conn
                                    .stream
                                    .server_status
                                    .contains(Status::SERVER_STATUS_CURSOR_EXISTS);

                            if cursor_open {
                                self.conn.stream.busy = Busy::NotBusy;
                                self.state = ResultsState::CursorIdle;
                            } else {
                                self.state = ResultsState::Rows;
                            }
                        }
                    }
                }

                ResultsState::CursorIdle => {
                    let statement_id =
                        self.statement_id.expect("cursor state without statement");

                    self.conn.stream.busy = Busy::Row;
                    self.conn
                        .stream
                        .send_packet(Fetch {
                            statement_id,
                            rows: self.fetch_size,
                        })
                        .await?;

                    self.state = ResultsState::CursorRows;
                }

                ResultsState::Rows | ResultsState::CursorRows => {
                    let payload = self.conn.stream.recv_packet().await?;
                    self.conn.stream.maybe_err(&payload)?;

                    if self.conn.stream.is_eof_packet(&payload) {
                        let status = self.conn.stream.handle_eof_packet(payload)?;

                        // a cursor-mode response under DEPRECATE_EOF: the
                        // metadata terminator announces the open cursor and
                        // rows must be fetched explicitly
                        if self.state == ResultsState::Rows
                            && self.statement_id.is_some()
                            && status.contains(Status::SERVER_STATUS_CURSOR_EXISTS)
                            && !status.contains(Status::SERVER_STATUS_LAST_ROW_SENT)
                        {
                            self.conn.stream.busy = Busy::NotBusy;
                            self.state = ResultsState::CursorIdle;
                            continue;
                        }

                        if self.state == ResultsState::CursorRows {
                            if status.contains(Status::SERVER_STATUS_LAST_ROW_SENT) {
                                self.conn.stream.busy = Busy::NotBusy;
                                self.state = ResultsState::Done;

                                return Ok(Some(Either::Left(MySqlQueryResult::default())));
                            }

                            // batch exhausted but the cursor has more
                            self.conn.stream.busy = Busy::NotBusy;
                            self.state = ResultsState::CursorIdle;
                            continue;
                        }

                        if status.contains(Status::SERVER_MORE_RESULTS_EXISTS) {
                            self.conn.stream.busy = Busy::Result;
                            self.state = ResultsState::ResultHead;
                        } else {
                            self.conn.stream.busy = Busy::NotBusy;
                            self.state = ResultsState::Done;
                        }

                        return Ok(Some(Either::Left(MySqlQueryResult::default())));
                    }

                    let row = self.decode_row(payload)?;

                    return Ok(Some(Either::Right(row)));
                }
            }
        }
    }

    fn decode_row(&mut self, payload: Bytes) -> Result<MySqlRow> {
        let row = match self.format {
            MySqlValueFormat::Text => {
                TextRow::decode_with(payload, self.conn.scratch_row_columns.len())?.0
            }

            MySqlValueFormat::Binary => BinaryRow::decode_with(payload, &self.types)?.0,
        };

        Ok(MySqlRow {
            row,
            format: self.format,
            columns: Arc::clone(&self.conn.scratch_row_columns),
            column_names: Arc::clone(&self.conn.scratch_row_column_names),
        })
    }
}

