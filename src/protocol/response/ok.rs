use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::{BufExt, ProtocolDecode};
use crate::protocol::Status;

/// Indicates successful completion of a previous command.
///
/// With `DEPRECATE_EOF` negotiated, the server also sends this packet (with
/// the `0xfe` header) in place of a trailing EOF packet.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_basic_ok_packet.html>
/// <https://mariadb.com/kb/en/ok_packet/>
#[derive(Debug)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status: Status,
    pub warnings: u16,
}

impl ProtocolDecode<'_> for OkPacket {
    fn decode_with(mut buf: Bytes, _: ()) -> Result<Self, Error> {
        let header = buf.get_u8();
        if header != 0 && header != 0xfe {
            return Err(err_protocol!(
                "expected 0x00 or 0xFE (OK) but found 0x{:02x}",
                header
            ));
        }

        let affected_rows = buf.get_uint_lenenc()?.unwrap_or(0);
        let last_insert_id = buf.get_uint_lenenc()?.unwrap_or(0);
        let status = Status::from_bits_truncate(buf.get_u16_le());
        let warnings = buf.get_u16_le();

        // session-state info and the human-readable message may follow but
        // are not used by the driver

        Ok(Self {
            affected_rows,
            last_insert_id,
            status,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{OkPacket, Status};
    use crate::io::ProtocolDecode;

    const OK_HANDSHAKE: &[u8] = b"\x00\x00\x00\x02\x40\x00\x00";

    #[test]
    fn it_decodes_an_ok_packet() {
        let p = OkPacket::decode(Bytes::from_static(OK_HANDSHAKE)).unwrap();

        assert_eq!(p.affected_rows, 0);
        assert_eq!(p.last_insert_id, 0);
        assert_eq!(p.warnings, 0);
        assert!(p.status.contains(Status::SERVER_STATUS_AUTOCOMMIT));
        assert!(p.status.contains(Status::SERVER_SESSION_STATE_CHANGED));
    }
}
