use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::ProtocolDecode;
use crate::protocol::{Capabilities, Status};

/// Marks the end of a sequence of column definitions or rows.
///
/// Not sent by MySQL 5.7.5+ or MariaDB 10.2+ when `DEPRECATE_EOF` was
/// negotiated; an [`OkPacket`][super::OkPacket] with the `0xfe` header takes
/// its place (and carries the same status flags).
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_basic_eof_packet.html>
/// <https://mariadb.com/kb/en/eof_packet/>
#[derive(Debug)]
pub struct EofPacket {
    pub warnings: u16,
    pub status: Status,
}

impl ProtocolDecode<'_, Capabilities> for EofPacket {
    fn decode_with(mut buf: Bytes, capabilities: Capabilities) -> Result<Self, Error> {
        if capabilities.contains(Capabilities::DEPRECATE_EOF) {
            return Err(err_protocol!(
                "an EOF packet should not be received with DEPRECATE_EOF in effect"
            ));
        }

        let header = buf.get_u8();
        if header != 0xfe {
            return Err(err_protocol!(
                "expected 0xFE (EOF) but found 0x{:02x}",
                header
            ));
        }

        let warnings = buf.get_u16_le();
        let status = Status::from_bits_truncate(buf.get_u16_le());

        Ok(Self { warnings, status })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::EofPacket;
    use crate::io::ProtocolDecode;
    use crate::protocol::{Capabilities, Status};

    #[test]
    fn it_decodes_an_eof_packet() {
        let p = EofPacket::decode_with(
            Bytes::from_static(b"\xfe\x00\x00\x22\x00"),
            Capabilities::PROTOCOL_41,
        )
        .unwrap();

        assert_eq!(p.warnings, 0);
        assert!(p.status.contains(Status::SERVER_STATUS_AUTOCOMMIT));
        assert!(p.status.contains(Status::SERVER_QUERY_NO_INDEX_USED));
    }
}
