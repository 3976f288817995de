use crate::arguments::MySqlArguments;
use crate::io::ProtocolEncode;
use crate::protocol::Capabilities;

bitflags::bitflags! {
    // https://dev.mysql.com/doc/dev/mysql-server/8.0.12/mysql__com_8h.html#a3e5e9e744ff6f7b989a604fd669977da
    // https://mariadb.com/kb/en/library/com_stmt_execute/#flag
    pub struct CursorFlags: u8 {
        const NO_CURSOR = 0;
        const READ_ONLY = 1;
        const FOR_UPDATE = 2;
        const SCROLLABLE = 4;
    }
}

// https://dev.mysql.com/doc/dev/mysql-server/8.0.12/page_protocol_com_stmt_execute.html
#[derive(Debug)]
pub struct Execute<'a> {
    pub statement_id: u32,
    pub cursor: CursorFlags,
    pub arguments: &'a MySqlArguments,
}

impl ProtocolEncode<'_, Capabilities> for Execute<'_> {
    fn encode_with(&self, buf: &mut Vec<u8>, _: Capabilities) {
        buf.push(0x17); // COM_STMT_EXECUTE

        // statement_id : int<4>
        buf.extend_from_slice(&self.statement_id.to_le_bytes());

        // flags : int<1>
        buf.push(self.cursor.bits());

        // iteration_count (always 1) : int<4>
        buf.extend_from_slice(&1_u32.to_le_bytes());

        if !self.arguments.types.is_empty() {
            // null bitmap : byte<(param_count + 7) / 8>
            buf.extend_from_slice(&self.arguments.null_bitmap);

            // new_params_bound_flag : int<1>
            buf.push(1);

            for ty in &self.arguments.types {
                // parameter type : int<1>
                buf.push(ty.r#type as u8);

                // unsigned flag : int<1>
                buf.push(if ty.is_unsigned() { 0x80 } else { 0 });
            }

            // values for all non-NULL parameters : byte<n>
            buf.extend_from_slice(&self.arguments.values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Capabilities, CursorFlags, Execute};
    use crate::arguments::MySqlArguments;
    use crate::io::ProtocolEncode;

    #[test]
    fn it_encodes_execute_with_an_int_parameter() {
        let mut arguments = MySqlArguments::new();
        arguments.add_i32(42);

        let mut buf = Vec::new();
        Execute {
            statement_id: 7,
            cursor: CursorFlags::NO_CURSOR,
            arguments: &arguments,
        }
        .encode_with(&mut buf, Capabilities::empty());

        assert_eq!(
            &buf[..],
            b"\x17\x07\x00\x00\x00\x00\x01\x00\x00\x00\x00\x01\x03\x00\x2a\x00\x00\x00"
        );
    }

    #[test]
    fn it_encodes_execute_without_parameters() {
        let mut buf = Vec::new();
        Execute {
            statement_id: 1,
            cursor: CursorFlags::READ_ONLY,
            arguments: &MySqlArguments::new(),
        }
        .encode_with(&mut buf, Capabilities::empty());

        // opcode, statement id, cursor flag, iteration count; nothing else
        assert_eq!(&buf[..], b"\x17\x01\x00\x00\x00\x01\x01\x00\x00\x00");
    }
}
