use crate::io::BufMutExt;
use crate::protocol::ColumnType;
use crate::value::{encode_date_time, encode_time, MySqlDateTime, MySqlTime, MySqlTypeInfo};

/// The collection of parameters bound to a prepared statement, in 1-based
/// positional order, pre-serialized into the binary protocol.
///
/// NULL parameters contribute a type code and a bit in the null bitmap but
/// no value bytes.
#[derive(Debug, Default, Clone)]
pub struct MySqlArguments {
    pub(crate) values: Vec<u8>,
    pub(crate) types: Vec<MySqlTypeInfo>,
    pub(crate) null_bitmap: Vec<u8>,
}

impl MySqlArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of bound parameters.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn declare(&mut self, r#type: ColumnType, unsigned: bool) {
        let index = self.types.len();

        self.types.push(MySqlTypeInfo::binary(r#type, unsigned));

        // one bit per parameter, no offset
        if self.null_bitmap.len() <= index / 8 {
            self.null_bitmap.push(0);
        }
    }

    pub fn add_null(&mut self) {
        let index = self.types.len();
        self.declare(ColumnType::Null, false);
        self.null_bitmap[index / 8] |= 1 << (index % 8);
    }

    pub fn add_i8(&mut self, value: i8) {
        self.declare(ColumnType::Tiny, false);
        self.values.push(value as u8);
    }

    pub fn add_i16(&mut self, value: i16) {
        self.declare(ColumnType::Short, false);
        self.values.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_i32(&mut self, value: i32) {
        self.declare(ColumnType::Long, false);
        self.values.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_i64(&mut self, value: i64) {
        self.declare(ColumnType::LongLong, false);
        self.values.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_u8(&mut self, value: u8) {
        self.declare(ColumnType::Tiny, true);
        self.values.push(value);
    }

    pub fn add_u16(&mut self, value: u16) {
        self.declare(ColumnType::Short, true);
        self.values.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_u32(&mut self, value: u32) {
        self.declare(ColumnType::Long, true);
        self.values.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_u64(&mut self, value: u64) {
        self.declare(ColumnType::LongLong, true);
        self.values.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_f32(&mut self, value: f32) {
        self.declare(ColumnType::Float, false);
        self.values.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_f64(&mut self, value: f64) {
        self.declare(ColumnType::Double, false);
        self.values.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_str(&mut self, value: &str) {
        self.declare(ColumnType::VarString, false);
        self.values.put_str_lenenc(value);
    }

    pub fn add_bytes(&mut self, value: &[u8]) {
        self.declare(ColumnType::Blob, false);
        self.values.put_bytes_lenenc(value);
    }

    pub fn add_date_time(&mut self, value: MySqlDateTime) {
        self.declare(ColumnType::Datetime, false);
        encode_date_time(&value, &mut self.values);
    }

    pub fn add_time(&mut self, value: MySqlTime) {
        self.declare(ColumnType::Time, false);
        encode_time(&value, &mut self.values);
    }
}

#[cfg(test)]
mod tests {
    use super::MySqlArguments;

    #[test]
    fn null_parameters_set_bitmap_bits_but_no_bytes() {
        let mut args = MySqlArguments::new();
        args.add_i32(42);
        args.add_null();
        args.add_str("x");

        assert_eq!(args.len(), 3);
        assert_eq!(args.null_bitmap, [0b010]);

        // 4 bytes for the int, 2 for the length-prefixed string
        assert_eq!(args.values.len(), 6);
    }

    #[test]
    fn bitmap_grows_past_eight_parameters() {
        let mut args = MySqlArguments::new();

        for _ in 0..9 {
            args.add_null();
        }

        assert_eq!(args.null_bitmap, [0xff, 0x01]);
    }
}
