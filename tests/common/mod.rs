//! A minimal in-process MySQL server good enough to exercise the
//! connection phase and the pool: it advertises `mysql_native_password`,
//! accepts any credentials, answers every query with OK (or a canned
//! one-row result set for `SELECT 1`), and honors PING, RESET, and QUIT.

#![allow(dead_code)]

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// protocol 10 banner: 8-byte scramble part, capability bits (incl.
// SECURE_CONNECTION, PLUGIN_AUTH, DEPRECATE_EOF), 12-byte scramble part,
// plugin name
const HANDSHAKE: &[u8] = b"\n5.5.5-10.5.8-MariaDB-1:10.5.8+maria~focal\0)\0\0\04bo+$r4H\0\xfe\xf7-\x02\0\xff\x81\x15\0\0\0\0\0\0\x0f\0\0\0O5X>j}Ur]Y)^\0mysql_native_password\0";

const OK: &[u8] = b"\x00\x00\x00\x02\x00\x00\x00";

// 0xfe-headed OK: the row-stream terminator under DEPRECATE_EOF
const OK_EOF: &[u8] = b"\xfe\x00\x00\x02\x00\x00\x00";

/// How the mock behaves during the authentication exchange.
#[derive(Clone, Copy, Debug)]
pub enum AuthBehavior {
    /// Accept the initial response.
    Accept,

    /// Demand a switch to a fresh `mysql_native_password` scramble first.
    SwitchPlugin,

    /// Reject with ERR 1045 (access denied).
    Deny,
}

pub async fn write_packet(stream: &mut TcpStream, seq: u8, payload: &[u8]) -> std::io::Result<()> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
    frame.push(seq);
    frame.extend_from_slice(payload);

    stream.write_all(&frame).await?;
    stream.flush().await
}

pub async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0_u8; 4];
    stream.read_exact(&mut header).await?;

    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let seq = header[3];

    let mut payload = vec![0_u8; len];
    stream.read_exact(&mut payload).await?;

    Ok((seq, payload))
}

/// Bind a mock server; each accepted connection is served on its own task.
pub async fn spawn_mock_server(auth: AuthBehavior) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };

            tokio::spawn(async move {
                let _ = serve(stream, auth).await;
            });
        }
    });

    addr
}

async fn serve(mut stream: TcpStream, auth: AuthBehavior) -> std::io::Result<()> {
    write_packet(&mut stream, 0, HANDSHAKE).await?;

    // HandshakeResponse (the client never requests TLS in these tests)
    let (mut seq, _response) = read_packet(&mut stream).await?;

    match auth {
        AuthBehavior::Accept => {
            write_packet(&mut stream, seq.wrapping_add(1), OK).await?;
        }

        AuthBehavior::SwitchPlugin => {
            write_packet(
                &mut stream,
                seq.wrapping_add(1),
                b"\xfemysql_native_password\0\r.89j]CpA3Ov~\x1de\\/\x15,\r\0",
            )
            .await?;

            let (switch_seq, scrambled) = read_packet(&mut stream).await?;
            assert_eq!(scrambled.len(), 20, "re-hashed response must be 20 bytes");
            seq = switch_seq;

            write_packet(&mut stream, seq.wrapping_add(1), OK).await?;
        }

        AuthBehavior::Deny => {
            write_packet(
                &mut stream,
                seq.wrapping_add(1),
                b"\xff\x15\x04#28000Access denied for user 'root'@'127.0.0.1'",
            )
            .await?;
            return Ok(());
        }
    }

    // command phase
    loop {
        let (_, payload) = match read_packet(&mut stream).await {
            Ok(packet) => packet,
            Err(_) => return Ok(()),
        };

        match payload.first() {
            // COM_QUIT
            Some(0x01) => return Ok(()),

            // COM_STMT_CLOSE has no response
            Some(0x19) => {}

            // COM_STATISTICS: a single free-form reply
            Some(0x08) => {
                write_packet(
                    &mut stream,
                    1,
                    b"Uptime: 126  Threads: 1  Questions: 130  Slow queries: 0",
                )
                .await?;
            }

            // COM_QUERY
            Some(0x03) if &payload[1..] == b"SELECT 1" => {
                // column count
                write_packet(&mut stream, 1, b"\x01").await?;

                // column definition: catalog "def", no names, type LONGLONG
                write_packet(
                    &mut stream,
                    2,
                    b"\x03def\0\0\0\x011\0\x0c\x3f\x00\x01\x00\x00\x00\x08\x81\x00\x00\x00\x00",
                )
                .await?;

                // one text row: "1"
                write_packet(&mut stream, 3, b"\x011").await?;

                write_packet(&mut stream, 4, OK_EOF).await?;
            }

            // COM_STMT_PREPARE: statement 1, one parameter, two columns
            Some(0x16) => {
                write_packet(
                    &mut stream,
                    1,
                    b"\x00\x01\x00\x00\x00\x02\x00\x01\x00\x00\x00\x00",
                )
                .await?;

                // the untyped parameter
                write_packet(&mut stream, 2, PARAM_DEF).await?;

                // result columns: id INT, name VARCHAR
                write_packet(&mut stream, 3, COLUMN_DEF_INT_ID).await?;
                write_packet(&mut stream, 4, COLUMN_DEF_VARCHAR_NAME).await?;
            }

            // COM_STMT_EXECUTE: one binary row {id: 42, name: "x"}
            Some(0x17) => {
                let cursor = payload.get(5).copied().unwrap_or(0) & 0x01 != 0;

                write_packet(&mut stream, 1, b"\x02").await?;
                write_packet(&mut stream, 2, COLUMN_DEF_INT_ID).await?;
                write_packet(&mut stream, 3, COLUMN_DEF_VARCHAR_NAME).await?;

                if cursor {
                    // no inline rows; announce the open cursor
                    write_packet(&mut stream, 4, OK_EOF_CURSOR_EXISTS).await?;
                } else {
                    write_packet(&mut stream, 4, BINARY_ROW_42_X).await?;
                    write_packet(&mut stream, 5, OK_EOF).await?;
                }
            }

            // COM_STMT_FETCH: the single batch of the open cursor
            Some(0x1c) => {
                write_packet(&mut stream, 1, BINARY_ROW_42_X).await?;
                write_packet(&mut stream, 2, OK_EOF_LAST_ROW_SENT).await?;
            }

            // every other command (queries, ping, reset) succeeds with OK
            _ => {
                write_packet(&mut stream, 1, OK).await?;
            }
        }
    }
}

const PARAM_DEF: &[u8] =
    b"\x03def\0\0\0\x01?\0\x0c\x3f\x00\x00\x00\x00\x00\xfd\x00\x00\x00\x00\x00";

const COLUMN_DEF_INT_ID: &[u8] =
    b"\x03def\0\0\0\x02id\x02id\x0c\x3f\x00\x0b\x00\x00\x00\x03\x00\x00\x00\x00\x00";

const COLUMN_DEF_VARCHAR_NAME: &[u8] =
    b"\x03def\0\0\0\x04name\x04name\x0c\x21\x00\xfc\x03\x00\x00\xfd\x00\x00\x00\x00\x00";

// null bitmap 0b00, id = 42 (LE), name = "x" (lenenc)
const BINARY_ROW_42_X: &[u8] = b"\x00\x00\x2a\x00\x00\x00\x01x";

const OK_EOF_CURSOR_EXISTS: &[u8] = b"\xfe\x00\x00\x42\x00\x00\x00";
const OK_EOF_LAST_ROW_SENT: &[u8] = b"\xfe\x00\x00\x82\x00\x00\x00";
