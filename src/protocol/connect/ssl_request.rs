use crate::io::ProtocolEncode;
use crate::protocol::Capabilities;

/// Sent in place of a [`HandshakeResponse`][super::HandshakeResponse] to
/// request a TLS upgrade. The server does not reply; the client performs the
/// TLS handshake on the same socket and then continues the connection phase
/// over the encrypted channel.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_connection_phase_packets_protocol_ssl_request.html>
/// <https://mariadb.com/kb/en/connection/#sslrequest-packet>
#[derive(Debug)]
pub struct SslRequest {
    pub max_packet_size: u32,
    pub collation: u8,
}

impl ProtocolEncode<'_, Capabilities> for SslRequest {
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
    }
}

#[cfg(test)]
mod tests {
    use super::SslRequest;
    use crate::io::ProtocolEncode;
    use crate::protocol::Capabilities;

    #[test]
    fn it_encodes_an_ssl_request() {
        let mut buf = Vec::new();

        let capabilities =
            Capabilities::MYSQL | Capabilities::PROTOCOL_41 | Capabilities::SSL;

        SslRequest {
            max_packet_size: 1024,
            collation: 45,
        }
        .encode_with(&mut buf, capabilities);

        // 4 + 4 + 1 + 19 + 4
        assert_eq!(buf.len(), 32);

        // trailing 23 bytes are reserved zeros
        assert!(buf[9..].iter().all(|&b| b == 0));
    }
}
