use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::{BufExt, ProtocolDecode};
use crate::protocol::Row;

/// A row in the text protocol: one length-encoded string per column, with
/// `0xFB` marking SQL NULL.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_query_response_text_resultset_row.html>
#[derive(Debug)]
pub struct TextRow(pub Row);

impl ProtocolDecode<'_, usize> for TextRow {
    fn decode_with(buf: Bytes, columns: usize) -> Result<Self, Error> {
        let storage = buf.clone();
        let mut buf = buf;

        let mut values = Vec::with_capacity(columns);
        let mut offset = 0;

        for _ in 0..columns {
            if buf.first() == Some(&0xfb) {
                // NULL is sent as 0xFB
                buf.advance(1);
                offset += 1;
                values.push(None);
            } else {
                let prefix_len = buf.len();
                let size = buf
                    .get_uint_lenenc()?
                    .ok_or_else(|| err_protocol!("unexpected NULL tag in text row"))?
                    as usize;
                let prefix_len = prefix_len - buf.len();

                if buf.len() < size {
                    return Err(err_protocol!(
                        "text row value of {} bytes exceeds packet",
                        size
                    ));
                }

                offset += prefix_len;
                values.push(Some(offset..offset + size));

                offset += size;
                buf.advance(size);
            }
        }

        if !buf.is_empty() {
            return Err(err_protocol!(
                "{} trailing bytes after decoding text row",
                buf.len()
            ));
        }

        Ok(TextRow(Row { storage, values }))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::TextRow;
    use crate::io::ProtocolDecode;

    #[test]
    fn it_decodes_a_text_row() {
        let row = TextRow::decode_with(Bytes::from_static(b"\x012\xfb\x05hello"), 3).unwrap();

        assert_eq!(row.0.len(), 3);
        assert_eq!(row.0.get(0), Some(&b"2"[..]));
        assert_eq!(row.0.get(1), None);
        assert_eq!(row.0.get(2), Some(&b"hello"[..]));
    }

    #[test]
    fn it_rejects_a_short_row() {
        assert!(TextRow::decode_with(Bytes::from_static(b"\x012"), 2).is_err());
    }
}
