use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::{BufExt, ProtocolDecode};
use crate::protocol::{ColumnType, Row};
use crate::value::MySqlTypeInfo;

/// A row in the binary protocol: a null bitmap followed by one
/// type-directed binary value per non-NULL column.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_binary_resultset.html#sect_protocol_binary_resultset_row>
#[derive(Debug)]
pub struct BinaryRow(pub Row);

impl<'de> ProtocolDecode<'de, &'de [MySqlTypeInfo]> for BinaryRow {
    fn decode_with(mut buf: Bytes, columns: &[MySqlTypeInfo]) -> Result<Self, Error> {
        let header = buf.get_u8();
        if header != 0 {
            return Err(err_protocol!(
                "expected 0x00 (ROW) but found 0x{:02x}",
                header
            ));
        }

        // NULL bitmap : byte<(column_count + 7 + 2) / 8>, offset of 2 bits
        let bitmap_len = (columns.len() + 9) / 8;
        let null_bitmap = buf.get_bytes(bitmap_len)?;

        let storage = buf.clone();
        let mut values = Vec::with_capacity(columns.len());
        let mut offset = 0;

        for (index, column) in columns.iter().enumerate() {
            let bit = index + 2;

            if null_bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
                values.push(None);
                continue;
            }

            let (prefix, size) = match column.r#type {
                ColumnType::Null => (0, 0),

                ColumnType::Tiny => (0, 1),
                ColumnType::Short | ColumnType::Year => (0, 2),
                ColumnType::Long | ColumnType::Int24 | ColumnType::Float => (0, 4),
                ColumnType::LongLong | ColumnType::Double => (0, 8),

                // temporal values carry their own length byte, which the
                // value decoder needs; keep it in the range
                ColumnType::Date
                | ColumnType::Time
                | ColumnType::Datetime
                | ColumnType::Timestamp => {
                    let len = *buf
                        .first()
                        .ok_or_else(|| err_protocol!("binary row too short for temporal value"))?;

                    (0, 1 + len as usize)
                }

                // everything else is length-encoded, with the prefix
                // excluded from the stored range
                _ => {
                    let before = buf.len();
                    let len = buf
                        .get_uint_lenenc()?
                        .ok_or_else(|| err_protocol!("unexpected NULL tag in binary row"))?;

                    (before - buf.len(), len as usize)
                }
            };

            // `prefix` bytes were already consumed by the length read above
            if buf.len() < size {
                return Err(err_protocol!(
                    "binary row value of {} bytes exceeds packet",
                    size
                ));
            }

            buf.advance(size);

            offset += prefix;
            values.push(Some(offset..offset + size));
            offset += size;
        }

        Ok(BinaryRow(Row { storage, values }))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::BinaryRow;
    use crate::io::ProtocolDecode;
    use crate::protocol::ColumnType;
    use crate::value::MySqlTypeInfo;

    #[test]
    fn it_decodes_a_binary_row() {
        // [id: INT = 42] [name: VARCHAR = "x"]
        let columns = [
            MySqlTypeInfo::binary(ColumnType::Long, false),
            MySqlTypeInfo::binary(ColumnType::VarString, false),
        ];

        let row = BinaryRow::decode_with(
            Bytes::from_static(b"\x00\x00\x2a\x00\x00\x00\x01x"),
            &columns,
        )
        .unwrap();

        assert_eq!(row.0.len(), 2);
        assert_eq!(row.0.get(0), Some(&b"\x2a\x00\x00\x00"[..]));
        assert_eq!(row.0.get(1), Some(&b"x"[..]));
    }

    #[test]
    fn it_honors_the_null_bitmap_offset() {
        // three columns, the middle one NULL: bits 2,3,4 are the columns,
        // so NULL in column 1 sets bit 3 (0b0000_1000)
        let columns = [
            MySqlTypeInfo::binary(ColumnType::Tiny, false),
            MySqlTypeInfo::binary(ColumnType::Tiny, false),
            MySqlTypeInfo::binary(ColumnType::Tiny, false),
        ];

        let row = BinaryRow::decode_with(Bytes::from_static(b"\x00\x08\x01\x03"), &columns)
            .unwrap();

        assert_eq!(row.0.get(0), Some(&b"\x01"[..]));
        assert_eq!(row.0.get(1), None);
        assert_eq!(row.0.get(2), Some(&b"\x03"[..]));
    }

    #[test]
    fn it_decodes_a_binary_datetime() {
        let columns = [MySqlTypeInfo::binary(ColumnType::Datetime, false)];

        // length 4: 2023-06-14
        let row = BinaryRow::decode_with(
            Bytes::from_static(b"\x00\x00\x04\xe7\x07\x06\x0e"),
            &columns,
        )
        .unwrap();

        assert_eq!(row.0.get(0), Some(&b"\x04\xe7\x07\x06\x0e"[..]));
    }
}
