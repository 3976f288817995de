use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::{BufExt, ProtocolDecode, ProtocolEncode};
use crate::protocol::Capabilities;

/// Directs the client to abandon the plugin named in the handshake and
/// restart authentication with a different one, against a fresh scramble.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_connection_phase_packets_protocol_auth_switch_request.html>
#[derive(Debug)]
pub struct AuthSwitchRequest {
    pub plugin: String,
    pub data: Bytes,
}

impl ProtocolDecode<'_> for AuthSwitchRequest {
    fn decode_with(mut buf: Bytes, _: ()) -> Result<Self, Error> {
        let header = buf.get_u8();
        if header != 0xfe {
            return Err(err_protocol!(
                "expected 0xFE (AUTH_SWITCH) but found 0x{:02x}",
                header
            ));
        }

        let plugin = buf.get_str_nul()?;

        // the remainder is the new scramble, typically 20 bytes plus a
        // NUL terminator; plugins with no scramble (e.g. cleartext) send none
        let data = match buf.last() {
            Some(0) => buf.slice(..buf.len() - 1),
            _ => buf,
        };

        Ok(Self { plugin, data })
    }
}

/// The re-hashed authentication data produced by the newly selected plugin.
#[derive(Debug)]
pub struct AuthSwitchResponse(pub Vec<u8>);

impl ProtocolEncode<'_, Capabilities> for AuthSwitchResponse {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.extend_from_slice(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::AuthSwitchRequest;
    use crate::io::ProtocolDecode;

    #[test]
    fn it_decodes_an_auth_switch_request() {
        let p = AuthSwitchRequest::decode(Bytes::from_static(
            b"\xfemysql_native_password\0\r.89j]CpA3Ov~\x1de\\/\x15,\r\0",
        ))
        .unwrap();

        assert_eq!(&*p.plugin, "mysql_native_password");
        assert_eq!(p.data.len(), 20);
    }

    #[test]
    fn it_decodes_an_auth_switch_request_with_no_data() {
        let p = AuthSwitchRequest::decode(Bytes::from_static(b"\xfedialog\0")).unwrap();

        assert_eq!(&*p.plugin, "dialog");
        assert!(p.data.is_empty());
    }
}
