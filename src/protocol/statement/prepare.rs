use crate::io::ProtocolEncode;
use crate::protocol::Capabilities;

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_stmt_prepare.html
#[derive(Debug)]
pub struct Prepare<'a> {
    pub query: &'a str,
}

impl ProtocolEncode<'_, Capabilities> for Prepare<'_> {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.push(0x16); // COM_STMT_PREPARE
        buf.extend_from_slice(self.query.as_bytes());
    }
}

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_stmt_close.html
//
// No response is sent back to the client.
#[derive(Debug)]
pub struct StmtClose {
    pub statement_id: u32,
}

impl ProtocolEncode<'_, Capabilities> for StmtClose {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.push(0x19); // COM_STMT_CLOSE
        buf.extend_from_slice(&self.statement_id.to_le_bytes());
    }
}
