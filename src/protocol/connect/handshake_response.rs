use crate::io::{BufMutExt, ProtocolEncode};
use crate::protocol::Capabilities;

/// The reply to the server's [`Handshake`][super::Handshake], carrying the
/// negotiated capability set, credentials, and the initial authentication
/// response. Once this packet is sent the capability set is frozen for the
/// lifetime of the connection.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_connection_phase_packets_protocol_handshake_response.html>
/// <https://mariadb.com/kb/en/connection/#handshake-response-packet>
#[derive(Debug)]
pub struct HandshakeResponse<'a> {
    pub max_packet_size: u32,
    pub collation: u8,
    pub username: &'a str,
    pub database: Option<&'a str>,
    pub auth_plugin: Option<&'a str>,
    pub auth_response: Option<&'a [u8]>,
}

impl ProtocolEncode<'_, Capabilities> for HandshakeResponse<'_> {
    fn encode_with(&self, buf: &mut Vec<u8>, capabilities: Capabilities) {
        // client capabilities : int<4>
        buf.extend_from_slice(&(capabilities.bits() as u32).to_le_bytes());

        // max packet size : int<4>
        buf.extend_from_slice(&self.max_packet_size.to_le_bytes());

        // client character collation : int<1>
        buf.push(self.collation);

        // reserved : string<19>
        buf.extend_from_slice(&[0_u8; 19]);

        if capabilities.contains(Capabilities::MYSQL) {
            // reserved : string<4>
            buf.extend_from_slice(&[0_u8; 4]);
        } else {
            // extended client capabilities : int<4>
            buf.extend_from_slice(&((capabilities.bits() >> 32) as u32).to_le_bytes());
        }

        // username : string<NUL>
        buf.put_str_nul(self.username);

        let auth_response = self.auth_response.unwrap_or_default();

        if capabilities.contains(Capabilities::PLUGIN_AUTH_LENENC_DATA) {
            // auth_response : string<lenenc>
            buf.put_bytes_lenenc(auth_response);
        } else if capabilities.contains(Capabilities::SECURE_CONNECTION) {
            // auth_response_length : int<1>
            buf.push(auth_response.len() as u8);

            // auth_response : string<{auth_response_length}>
            buf.extend_from_slice(auth_response);
        } else {
            // no auth response : int<1>
            buf.push(0);
        }

        if capabilities.contains(Capabilities::CONNECT_WITH_DB) {
            if let Some(database) = self.database {
                // database : string<NUL>
                buf.put_str_nul(database);
            }
        }

        if capabilities.contains(Capabilities::PLUGIN_AUTH) {
            // client_plugin_name : string<NUL>
            buf.put_str_nul(self.auth_plugin.unwrap_or_default());
        }

        if capabilities.contains(Capabilities::CONNECT_ATTRS) {
            // connection attributes : lenenc total length,
            // then (key : string<lenenc>, value : string<lenenc>)*
            let mut attrs = Vec::with_capacity(64);
            attrs.put_str_lenenc("_client_name");
            attrs.put_str_lenenc("mariner");
            attrs.put_str_lenenc("_client_version");
            attrs.put_str_lenenc(env!("CARGO_PKG_VERSION"));

            buf.put_uint_lenenc(attrs.len() as u64);
            buf.extend_from_slice(&attrs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HandshakeResponse;
    use crate::io::ProtocolEncode;
    use crate::protocol::Capabilities;

    #[test]
    fn it_encodes_a_handshake_response() {
        let mut buf = Vec::new();

        let capabilities = Capabilities::MYSQL
            | Capabilities::PROTOCOL_41
            | Capabilities::SECURE_CONNECTION
            | Capabilities::PLUGIN_AUTH
            | Capabilities::PLUGIN_AUTH_LENENC_DATA;

        HandshakeResponse {
            max_packet_size: 1024,
            collation: 45,
            username: "root",
            database: None,
            auth_plugin: Some("mysql_native_password"),
            auth_response: Some(&[0xaa; 20]),
        }
        .encode_with(&mut buf, capabilities);

        // capabilities, max packet size, collation
        assert_eq!(&buf[..4], (capabilities.bits() as u32).to_le_bytes());
        assert_eq!(&buf[4..8], 1024_u32.to_le_bytes());
        assert_eq!(buf[8], 45);

        // 23 bytes of filler, then the NUL-terminated username
        assert!(buf[9..32].iter().all(|&b| b == 0));
        assert_eq!(&buf[32..37], b"root\0");

        // length-prefixed auth response, then the plugin name
        assert_eq!(buf[37], 20);
        assert_eq!(&buf[38..58], &[0xaa; 20][..]);
        assert_eq!(&buf[58..], b"mysql_native_password\0");
    }
}
