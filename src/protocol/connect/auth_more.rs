use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::ProtocolDecode;

/// Extra authentication data from the server, used by plugins with more
/// than one round trip. For `caching_sha2_password` the single data byte
/// selects between fast-auth success (`0x03`) and full authentication
/// (`0x04`); for the RSA exchange it carries the server's public key in PEM.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_connection_phase_packets_protocol_auth_more_data.html>
#[derive(Debug)]
pub struct AuthMoreData {
    pub data: Bytes,
}

impl AuthMoreData {
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

impl ProtocolDecode<'_> for AuthMoreData {
    fn decode_with(mut buf: Bytes, _: ()) -> Result<Self, Error> {
        let header = buf.get_u8();
        if header != 0x01 {
            return Err(err_protocol!(
                "expected 0x01 (AUTH_MORE_DATA) but found 0x{:02x}",
                header
            ));
        }

        Ok(Self { data: buf })
    }
}
