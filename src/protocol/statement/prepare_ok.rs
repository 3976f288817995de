use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::ProtocolDecode;

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_stmt_prepare.html#sect_protocol_com_stmt_prepare_response_ok
#[derive(Debug)]
pub struct PrepareOk {
    pub statement_id: u32,
    pub columns: u16,
    pub params: u16,
    pub warnings: u16,
}

impl ProtocolDecode<'_> for PrepareOk {
    fn decode_with(mut buf: Bytes, _: ()) -> Result<Self, Error> {
        let status = buf.get_u8();
        if status != 0x00 {
            return Err(err_protocol!(
                "expected 0x00 (COM_STMT_PREPARE_OK) but found 0x{:02x}",
                status
            ));
        }

        let statement_id = buf.get_u32_le();
        let columns = buf.get_u16_le();
        let params = buf.get_u16_le();

        buf.advance(1); // reserved : string<1>

        let warnings = buf.get_u16_le();

        Ok(Self {
            statement_id,
            columns,
            params,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::PrepareOk;
    use crate::io::ProtocolDecode;

    #[test]
    fn it_decodes_prepare_ok() {
        // statement id 1, two columns, one parameter
        let p = PrepareOk::decode(Bytes::from_static(
            b"\x00\x01\x00\x00\x00\x02\x00\x01\x00\x00\x00\x00",
        ))
        .unwrap();

        assert_eq!(p.statement_id, 1);
        assert_eq!(p.columns, 2);
        assert_eq!(p.params, 1);
        assert_eq!(p.warnings, 0);
    }
}
