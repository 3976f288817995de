use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::{BufExt, ProtocolDecode};
use crate::protocol::ColumnType;

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/group__group__cs__column__definition__flags.html
bitflags::bitflags! {
    pub struct ColumnFlags: u16 {
        // Field can't be NULL.
        const NOT_NULL = 1;

        // Field is part of a primary key.
        const PRIMARY_KEY = 2;

        // Field is part of a unique key.
        const UNIQUE_KEY = 4;

        // Field is part of a key.
        const MULTIPLE_KEY = 8;

        // Field is a blob.
        const BLOB = 16;

        // Field is unsigned.
        const UNSIGNED = 32;

        // Field is zerofill.
        const ZEROFILL = 64;

        // Field is binary.
        const BINARY = 128;

        // Field is an enumeration.
        const ENUM = 256;

        // Field is an auto-increment field.
        const AUTO_INCREMENT = 512;

        // Field is a timestamp.
        const TIMESTAMP = 1024;

        // Field is a set.
        const SET = 2048;

        // Field does not have a default value.
        const NO_DEFAULT_VALUE = 4096;

        // Field is set to NOW on UPDATE.
        const ON_UPDATE_NOW = 8192;

        // Field is a number.
        const NUM = 32768;
    }
}

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_query_response_text_resultset_column_definition.html
// https://mariadb.com/kb/en/resultset/#column-definition-packet
#[derive(Debug)]
pub struct ColumnDefinition {
    pub schema: Option<String>,
    pub table_alias: Option<String>,
    pub table: Option<String>,
    pub alias: Option<String>,
    pub name: Option<String>,
    pub char_set: u16,
    pub max_size: u32,
    pub r#type: ColumnType,
    pub flags: ColumnFlags,
    pub decimals: u8,
}

impl ColumnDefinition {
    /// The alias under which this column appears in the result set, falling
    /// back to the column's own name.
    pub fn label(&self) -> Option<&str> {
        self.alias
            .as_deref()
            .filter(|alias| !alias.is_empty())
            .or(self.name.as_deref())
    }
}

impl ProtocolDecode<'_> for ColumnDefinition {
    fn decode_with(mut buf: Bytes, _: ()) -> Result<Self, Error> {
        // catalog : string<lenenc> ( always "def" )
        let catalog = buf.get_str_lenenc()?;

        if catalog.as_deref() != Some("def") {
            return Err(err_protocol!(
                "expected column definition to begin with \"def\"; received {:?}",
                catalog
            ));
        }

        let schema = buf.get_str_lenenc()?;
        let table_alias = buf.get_str_lenenc()?;
        let table = buf.get_str_lenenc()?;
        let alias = buf.get_str_lenenc()?;
        let name = buf.get_str_lenenc()?;

        // length of fixed fields : int<lenenc> ( always 0x0c )
        let fixed_len = buf.get_uint_lenenc()?;

        if fixed_len != Some(0x0c) {
            return Err(err_protocol!(
                "expected 0x0c length of fixed column fields; received {:?}",
                fixed_len
            ));
        }

        let char_set = buf.get_u16_le();
        let max_size = buf.get_u32_le();
        let type_id = buf.get_u8();
        let flags = buf.get_u16_le();
        let decimals = buf.get_u8();

        Ok(Self {
            schema,
            table_alias,
            table,
            alias,
            name,
            char_set,
            max_size,
            r#type: ColumnType::try_from_u8(type_id)?,
            flags: ColumnFlags::from_bits_truncate(flags),
            decimals,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{ColumnDefinition, ColumnFlags, ColumnType};
    use crate::io::ProtocolDecode;

    const COLUMN_DEF_ID: &[u8] =
        b"\x03def\x03app\x01t\x01t\x02id\x02id\x0c\x3f\x00\x0b\x00\x00\x00\x03\x03\x50\x00\x00";

    #[test]
    fn it_decodes_a_column_definition() {
        let def = ColumnDefinition::decode(Bytes::from_static(COLUMN_DEF_ID)).unwrap();

        assert_eq!(def.schema.as_deref(), Some("app"));
        assert_eq!(def.table.as_deref(), Some("t"));
        assert_eq!(def.label(), Some("id"));
        assert_eq!(def.r#type, ColumnType::Long);
        assert!(def.flags.contains(ColumnFlags::NOT_NULL));
        assert!(def.flags.contains(ColumnFlags::PRIMARY_KEY));
    }
}
