use crate::io::{BufMutExt, ProtocolEncode};
use crate::protocol::Capabilities;

/// Re-authenticates as a different user on the same connection, resetting
/// all session state. The server replies with OK, ERR, or the same
/// authentication exchange used during connect.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_change_user.html>
#[derive(Debug)]
pub struct ChangeUser<'a> {
    pub username: &'a str,
    pub database: Option<&'a str>,
    pub collation: u16,
    pub auth_plugin: Option<&'a str>,
    pub auth_response: Option<&'a [u8]>,
}

impl ProtocolEncode<'_, Capabilities> for ChangeUser<'_> {
    fn encode_with(&self, buf: &mut Vec<u8>, capabilities: Capabilities) {
        buf.push(0x11); // COM_CHANGE_USER

        // username : string<NUL>
        buf.put_str_nul(self.username);

        let auth_response = self.auth_response.unwrap_or_default();

        if capabilities.contains(Capabilities::SECURE_CONNECTION) {
            // auth_response_length : int<1>
            buf.push(auth_response.len() as u8);
            buf.extend_from_slice(auth_response);
        } else {
            buf.extend_from_slice(auth_response);
            buf.push(0);
        }

        // database : string<NUL>
        buf.put_str_nul(self.database.unwrap_or_default());

        // client character collation : int<2>
        buf.extend_from_slice(&self.collation.to_le_bytes());

        if capabilities.contains(Capabilities::PLUGIN_AUTH) {
            // client_plugin_name : string<NUL>
            buf.put_str_nul(self.auth_plugin.unwrap_or_default());
        }
    }
}
