use crate::io::ProtocolEncode;
use crate::protocol::Capabilities;

/// Fetches the next batch of rows from a server-side cursor opened by
/// `COM_STMT_EXECUTE` with a cursor flag.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_stmt_fetch.html>
#[derive(Debug)]
pub struct Fetch {
    pub statement_id: u32,
    pub rows: u32,
}

impl ProtocolEncode<'_, Capabilities> for Fetch {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.push(0x1c); // COM_STMT_FETCH
        buf.extend_from_slice(&self.statement_id.to_le_bytes());
        buf.extend_from_slice(&self.rows.to_le_bytes());
    }
}
