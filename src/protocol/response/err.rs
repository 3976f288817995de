use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::{BufExt, ProtocolDecode};
use crate::protocol::Capabilities;

/// Signals that an error occurred.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_basic_err_packet.html>
/// <https://mariadb.com/kb/en/err_packet/>
#[derive(Debug)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: Option<String>,
    pub error_message: String,
}

impl ProtocolDecode<'_, Capabilities> for ErrPacket {
    fn decode_with(mut buf: Bytes, capabilities: Capabilities) -> Result<Self, Error> {
        let header = buf.get_u8();
        if header != 0xff {
            return Err(err_protocol!(
                "expected 0xFF (ERR) but found 0x{:02x}",
                header
            ));
        }

        let error_code = buf.get_u16_le();
        let mut sql_state = None;

        if capabilities.contains(Capabilities::PROTOCOL_41) && buf.first() == Some(&b'#') {
            // if the next byte is '#' then we have a SQLSTATE
            buf.advance(1);
            sql_state = Some(buf.get_str(5)?);
        }

        let error_message = buf.get_str(buf.len())?;

        Ok(Self {
            error_code,
            sql_state,
            error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::ErrPacket;
    use crate::io::ProtocolDecode;
    use crate::protocol::Capabilities;

    const ERR_HANDSHAKE_UNKNOWN_DB: &[u8] = b"\xff\x19\x04#42000Unknown database 'unknown'";

    #[test]
    fn it_decodes_an_err_packet() {
        let p = ErrPacket::decode_with(
            Bytes::from_static(ERR_HANDSHAKE_UNKNOWN_DB),
            Capabilities::PROTOCOL_41,
        )
        .unwrap();

        assert_eq!(p.error_code, 1049);
        assert_eq!(p.sql_state.as_deref(), Some("42000"));
        assert_eq!(&*p.error_message, "Unknown database 'unknown'");
    }

    #[test]
    fn it_decodes_an_err_packet_without_sql_state() {
        // the auth phase may emit errors before PROTOCOL_41 semantics apply
        let p = ErrPacket::decode_with(
            Bytes::from_static(b"\xff\x15\x04Access denied"),
            Capabilities::empty(),
        )
        .unwrap();

        assert_eq!(p.error_code, 1045);
        assert_eq!(p.sql_state, None);
        assert_eq!(&*p.error_message, "Access denied");
    }
}
