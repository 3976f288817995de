/// Writes for the MySQL flavors of variable-length data, mirroring
/// [`BufExt`][crate::io::BufExt].
pub trait BufMutExt {
    fn put_uint_lenenc(&mut self, value: u64);

    fn put_bytes_lenenc(&mut self, value: &[u8]);

    fn put_str_lenenc(&mut self, value: &str);

    fn put_str_nul(&mut self, value: &str);
}

impl BufMutExt for Vec<u8> {
    fn put_uint_lenenc(&mut self, value: u64) {
        // https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_basic_dt_integers.html
        if value < 251 {
            self.push(value as u8);
        } else if value <= u64::from(u16::MAX) {
            self.push(0xfc);
            self.extend_from_slice(&(value as u16).to_le_bytes());
        } else if value <= 0xff_ff_ff {
            self.push(0xfd);
            self.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
        } else {
            self.push(0xfe);
            self.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn put_bytes_lenenc(&mut self, value: &[u8]) {
        self.put_uint_lenenc(value.len() as u64);
        self.extend_from_slice(value);
    }

    fn put_str_lenenc(&mut self, value: &str) {
        self.put_bytes_lenenc(value.as_bytes());
    }

    fn put_str_nul(&mut self, value: &str) {
        self.extend_from_slice(value.as_bytes());
        self.push(0);
    }
}
