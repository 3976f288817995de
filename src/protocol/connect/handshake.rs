use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::{BufExt, ProtocolDecode};
use crate::protocol::{Capabilities, Status};

/// The initial handshake packet, sent by the server immediately after the
/// TCP connection is established. Received exactly once per connection and
/// immutable afterwards.
///
/// <https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_connection_phase_packets_protocol_handshake_v10.html>
/// <https://mariadb.com/kb/en/connection/#initial-handshake-packet>
#[derive(Debug)]
pub struct Handshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub server_capabilities: Capabilities,
    pub server_default_collation: u8,
    pub status: Status,
    pub auth_plugin: Option<String>,
    pub auth_plugin_data: Bytes,
}

impl ProtocolDecode<'_> for Handshake {
    fn decode_with(mut buf: Bytes, _: ()) -> Result<Self, Error> {
        let protocol_version = buf.get_u8(); // int<1>
        let server_version = buf.get_str_nul()?; // string<NUL>
        let connection_id = buf.get_u32_le(); // int<4>

        // scramble first part : string<8>
        let mut scramble = buf.get_bytes(8)?.to_vec();

        // reserved : string<1>
        buf.advance(1);

        // capability_flags_1 : int<2>
        let capabilities_1 = buf.get_u16_le();
        let mut capabilities = Capabilities::from_bits_truncate(capabilities_1.into());

        // character_set : int<1>
        let collation = buf.get_u8();

        // status_flags : int<2>
        let status = Status::from_bits_truncate(buf.get_u16_le());

        // capability_flags_2 : int<2>
        let capabilities_2 = buf.get_u16_le();
        capabilities |= Capabilities::from_bits_truncate(u64::from(capabilities_2) << 16);

        let auth_plugin_data_len = if capabilities.contains(Capabilities::PLUGIN_AUTH) {
            // plugin data length : int<1>
            buf.get_u8()
        } else {
            // 0x00 : int<1>
            buf.advance(1);
            0
        };

        // reserved : string<6>
        buf.advance(6);

        if capabilities.contains(Capabilities::MYSQL) {
            // reserved : string<4>
            buf.advance(4);
        } else {
            // capability_flags_3 : int<4>
            let capabilities_3 = buf.get_u32_le();
            capabilities |= Capabilities::from_bits_truncate(u64::from(capabilities_3) << 32);
        }

        if capabilities.contains(Capabilities::SECURE_CONNECTION) {
            // scramble second part : string<n> ( n = max(12, plugin data length - 9) )
            let len = ((auth_plugin_data_len as isize) - 9).max(12) as usize;
            scramble.extend_from_slice(&buf.get_bytes(len)?);

            // reserved : string<1>
            buf.advance(1);
        }

        let auth_plugin = if capabilities.contains(Capabilities::PLUGIN_AUTH) {
            // client_plugin_name : string<NUL>
            Some(buf.get_str_nul()?)
        } else {
            None
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            server_capabilities: capabilities,
            server_default_collation: collation,
            status,
            auth_plugin,
            auth_plugin_data: Bytes::from(scramble),
        })
    }
}
