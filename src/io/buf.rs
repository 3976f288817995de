use bytes::{Buf, Bytes};
use memchr::memchr;

use crate::error::Error;

/// Checked reads for the MySQL flavors of variable-length data:
/// length-encoded integers, length-encoded byte strings, and
/// NUL-terminated strings.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_basic_dt_integers.html>
pub trait BufExt: Buf {
    fn get_bytes(&mut self, len: usize) -> Result<Bytes, Error>;

    fn get_str(&mut self, len: usize) -> Result<String, Error>;

    fn get_bytes_nul(&mut self) -> Result<Bytes, Error>;

    fn get_str_nul(&mut self) -> Result<String, Error>;

    /// Reads a length-encoded integer. The `0xFB` tag, which marks a NULL
    /// value in result rows, yields `None`.
    fn get_uint_lenenc(&mut self) -> Result<Option<u64>, Error>;

    fn get_bytes_lenenc(&mut self) -> Result<Option<Bytes>, Error>;

    fn get_str_lenenc(&mut self) -> Result<Option<String>, Error>;
}

impl BufExt for Bytes {
    fn get_bytes(&mut self, len: usize) -> Result<Bytes, Error> {
        if self.remaining() < len {
            return Err(err_protocol!(
                "expected {} bytes but only {} remain",
                len,
                self.remaining()
            ));
        }

        Ok(self.split_to(len))
    }

    fn get_str(&mut self, len: usize) -> Result<String, Error> {
        let bytes = self.get_bytes(len)?;

        String::from_utf8(bytes.to_vec())
            .map_err(|err| err_protocol!("string is not valid UTF-8: {}", err))
    }

    fn get_bytes_nul(&mut self) -> Result<Bytes, Error> {
        let nul =
            memchr(b'\0', self).ok_or_else(|| err_protocol!("expected NUL in byte sequence"))?;

        let bytes = self.split_to(nul);
        self.advance(1);

        Ok(bytes)
    }

    fn get_str_nul(&mut self) -> Result<String, Error> {
        let bytes = self.get_bytes_nul()?;

        String::from_utf8(bytes.to_vec())
            .map_err(|err| err_protocol!("string is not valid UTF-8: {}", err))
    }

    fn get_uint_lenenc(&mut self) -> Result<Option<u64>, Error> {
        if !self.has_remaining() {
            return Err(err_protocol!("expected length-encoded integer at end of packet"));
        }

        Ok(match self.get_u8() {
            0xfb => None,

            0xfc => {
                require(self, 2)?;
                Some(u64::from(self.get_u16_le()))
            }

            0xfd => {
                require(self, 3)?;
                Some(self.get_uint_le(3))
            }

            0xfe => {
                require(self, 8)?;
                Some(self.get_u64_le())
            }

            value => Some(u64::from(value)),
        })
    }

    fn get_bytes_lenenc(&mut self) -> Result<Option<Bytes>, Error> {
        self.get_uint_lenenc()?
            .map(|len| self.get_bytes(len as usize))
            .transpose()
    }

    fn get_str_lenenc(&mut self) -> Result<Option<String>, Error> {
        self.get_uint_lenenc()?
            .map(|len| self.get_str(len as usize))
            .transpose()
    }
}

fn require(buf: &Bytes, len: usize) -> Result<(), Error> {
    if buf.remaining() < len {
        return Err(err_protocol!(
            "expected {} bytes but only {} remain",
            len,
            buf.remaining()
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::BufExt;

    #[test]
    fn it_reads_lenenc_integers() {
        let mut one = Bytes::from_static(b"\xfa");
        assert_eq!(one.get_uint_lenenc().unwrap(), Some(0xfa));

        let mut two = Bytes::from_static(b"\xfc\xfb\x00");
        assert_eq!(two.get_uint_lenenc().unwrap(), Some(251));

        let mut three = Bytes::from_static(b"\xfd\x01\x00\x01");
        assert_eq!(three.get_uint_lenenc().unwrap(), Some(0x01_00_01));

        let mut eight = Bytes::from_static(b"\xfe\x01\x00\x00\x00\x00\x00\x00\x01");
        assert_eq!(eight.get_uint_lenenc().unwrap(), Some(0x0100_0000_0000_0001));

        let mut null = Bytes::from_static(b"\xfb");
        assert_eq!(null.get_uint_lenenc().unwrap(), None);
    }

    #[test]
    fn it_reads_nul_terminated_strings() {
        let mut buf = Bytes::from_static(b"caching_sha2_password\0rest");

        assert_eq!(buf.get_str_nul().unwrap(), "caching_sha2_password");
        assert_eq!(&buf[..], b"rest");
    }

    #[test]
    fn it_rejects_truncated_reads() {
        let mut buf = Bytes::from_static(b"\xfc\x10");
        assert!(buf.get_uint_lenenc().is_err());

        let mut buf = Bytes::from_static(b"no-terminator");
        assert!(buf.get_str_nul().is_err());
    }
}
