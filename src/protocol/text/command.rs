use crate::io::ProtocolEncode;
use crate::protocol::Capabilities;

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_quit.html
#[derive(Debug)]
pub struct Quit;

impl ProtocolEncode<'_, Capabilities> for Quit {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.push(0x01); // COM_QUIT
    }
}

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_init_db.html
#[derive(Debug)]
pub struct InitDb<'a>(pub &'a str);

impl ProtocolEncode<'_, Capabilities> for InitDb<'_> {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.push(0x02); // COM_INIT_DB
        buf.extend_from_slice(self.0.as_bytes());
    }
}

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_query.html
#[derive(Debug)]
pub struct Query<'a>(pub &'a str);

impl ProtocolEncode<'_, Capabilities> for Query<'_> {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.push(0x03); // COM_QUERY
        buf.extend_from_slice(self.0.as_bytes());
    }
}

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_statistics.html
//
// The reply is a single packet containing a human-readable statistics
// string, not OK/ERR framed.
#[derive(Debug)]
pub struct Statistics;

impl ProtocolEncode<'_, Capabilities> for Statistics {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.push(0x08); // COM_STATISTICS
    }
}

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_ping.html
#[derive(Debug)]
pub struct Ping;

impl ProtocolEncode<'_, Capabilities> for Ping {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.push(0x0e); // COM_PING
    }
}

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_reset_connection.html
//
// Resets session state (user variables, temporary tables, prepared
// statements, autocommit) without re-authenticating.
#[derive(Debug)]
pub struct ResetConnection;

impl ProtocolEncode<'_, Capabilities> for ResetConnection {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.push(0x1f); // COM_RESET_CONNECTION
    }
}

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_set_option.html
#[derive(Debug, Clone, Copy)]
#[repr(u16)]
pub enum SetOption {
    MultiStatementsOn = 0,
    MultiStatementsOff = 1,
}

impl ProtocolEncode<'_, Capabilities> for SetOption {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.push(0x1b); // COM_SET_OPTION
        buf.extend_from_slice(&(*self as u16).to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::{Capabilities, Ping, Query, SetOption};
    use crate::io::ProtocolEncode;

    #[test]
    fn it_encodes_simple_commands() {
        let mut buf = Vec::new();
        Ping.encode_with(&mut buf, Capabilities::empty());
        assert_eq!(&buf[..], b"\x0e");

        let mut buf = Vec::new();
        Query("SELECT 1").encode_with(&mut buf, Capabilities::empty());
        assert_eq!(&buf[..], b"\x03SELECT 1");

        let mut buf = Vec::new();
        SetOption::MultiStatementsOn.encode_with(&mut buf, Capabilities::empty());
        assert_eq!(&buf[..], b"\x1b\x00\x00");
    }
}
