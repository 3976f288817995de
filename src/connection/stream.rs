use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::io::{ProtocolDecode, ProtocolEncode};
use crate::net::{MaybeTlsStream, Socket};
use crate::options::MySqlConnectOptions;
use crate::protocol::response::{EofPacket, ErrPacket, OkPacket};
use crate::protocol::{Capabilities, Status, MAX_PAYLOAD_LEN};

/// Tracks whether the server owes us response packets before the next
/// command may begin.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Busy {
    NotBusy,

    // waiting for a result set (or the OK/ERR that replaces one)
    Result,

    // waiting for the rows of a result set
    Row,
}

/// The framed, buffered, possibly-TLS byte stream carrying MySQL packets.
///
/// Owns the per-connection sequence id. Exclusive access (`&mut`) makes
/// each send/receive exchange atomic with respect to other tasks: a
/// connection lives on exactly one task at a time.
pub(crate) struct MySqlStream {
    socket: MaybeTlsStream,

    pub(crate) wbuf: Vec<u8>,
    rbuf: BytesMut,

    pub(crate) capabilities: Capabilities,
    pub(crate) sequence_id: u8,
    pub(crate) busy: Busy,

    pub(crate) server_status: Status,

    // set when the server reports a condition that invalidates the
    // connection itself (shutdown, aborted connection); a pool must
    // discard the connection instead of reusing it
    pub(crate) poisoned: bool,

    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl MySqlStream {
    pub(crate) async fn connect(options: &MySqlConnectOptions) -> Result<Self> {
        let socket = match &options.socket {
            Some(path) => Socket::connect_uds(path).await?,
            None => Socket::connect_tcp(&options.host, options.port).await?,
        };

        Ok(Self {
            socket: MaybeTlsStream::Raw(socket),
            wbuf: Vec::with_capacity(1024),
            rbuf: BytesMut::with_capacity(8192),
            capabilities: Capabilities::empty(),
            sequence_id: 0,
            busy: Busy::NotBusy,
            server_status: Status::empty(),
            poisoned: false,
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
        })
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.socket.is_tls()
    }

    pub(crate) async fn upgrade_tls(&mut self, options: &MySqlConnectOptions) -> Result<()> {
        self.socket.upgrade(options).await
    }

    /// Frame and buffer a packet, continuing the current sequence.
    ///
    /// Payloads of `MAX_PAYLOAD_LEN` bytes or more are split across
    /// continuation frames; a payload that is an exact multiple of the
    /// maximum is followed by an empty frame so the reader can tell the
    /// sequence has ended.
    pub(crate) fn write_packet<'en, T>(&mut self, payload: T)
    where
        T: ProtocolEncode<'en, Capabilities>,
    {
        let mut encoded = Vec::with_capacity(64);
        payload.encode_with(&mut encoded, self.capabilities);

        write_frames(&mut self.wbuf, &mut self.sequence_id, &encoded);
    }

    /// Reset the sequence and send a single command packet.
    pub(crate) async fn send_packet<'en, T>(&mut self, payload: T) -> Result<()>
    where
        T: ProtocolEncode<'en, Capabilities>,
    {
        self.sequence_id = 0;
        self.write_packet(payload);
        self.flush().await
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        if self.wbuf.is_empty() {
            return Ok(());
        }

        let wbuf = std::mem::take(&mut self.wbuf);

        let socket = &mut self.socket;
        let write = async {
            socket.write_all(&wbuf).await?;
            socket.flush().await
        };

        let res = match self.write_timeout {
            Some(timeout) => tokio::time::timeout(timeout, write)
                .await
                .map_err(|_| Error::Timeout("write"))?,
            None => write.await,
        };

        res?;

        self.wbuf = wbuf;
        self.wbuf.clear();

        Ok(())
    }

    async fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        while self.rbuf.len() < n {
            let read = self.socket.read_buf(&mut self.rbuf);

            let bytes_read = match self.read_timeout {
                Some(timeout) => tokio::time::timeout(timeout, read)
                    .await
                    .map_err(|_| Error::Timeout("read"))??,
                None => read.await?,
            };

            if bytes_read == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
        }

        Ok(self.rbuf.split_to(n).freeze())
    }

    /// Receive the next complete payload, reassembling continuation frames
    /// and enforcing sequence-id continuity.
    pub(crate) async fn recv_packet(&mut self) -> Result<Bytes> {
        let mut payload: Option<BytesMut> = None;

        loop {
            let mut header = self.read_exact(4).await?;

            let frame_len = header.get_uint_le(3) as usize;
            let sequence_id = header.get_u8();

            if sequence_id != self.sequence_id {
                return Err(err_protocol!(
                    "expected sequence id {} but found {}",
                    self.sequence_id,
                    sequence_id
                ));
            }

            self.sequence_id = sequence_id.wrapping_add(1);

            let frame = self.read_exact(frame_len).await?;

            match &mut payload {
                // the common case: a single short frame
                None if frame_len < MAX_PAYLOAD_LEN => {
                    if frame.is_empty() {
                        return Err(err_protocol!("received empty packet"));
                    }

                    return Ok(frame);
                }

                None => {
                    payload = Some(BytesMut::from(&frame[..]));
                }

                Some(payload) => {
                    payload.extend_from_slice(&frame);

                    if frame_len < MAX_PAYLOAD_LEN {
                        break;
                    }
                }
            }
        }

        Ok(payload.unwrap_or_default().freeze())
    }

    /// Receive an OK packet (or surface the server's ERR).
    pub(crate) async fn recv_ok(&mut self) -> Result<OkPacket> {
        let payload = self.recv_packet().await?;
        self.maybe_err(&payload)?;

        let ok = OkPacket::decode(payload)?;
        self.server_status = ok.status;

        Ok(ok)
    }

    /// If the payload is an ERR packet, parse it and return it as an error.
    pub(crate) fn maybe_err(&mut self, payload: &Bytes) -> Result<()> {
        if payload.first() == Some(&0xff) {
            self.busy = Busy::NotBusy;

            let err: Error = ErrPacket::decode_with(payload.clone(), self.capabilities)?.into();

            if err.is_fatal() {
                self.poisoned = true;
            }

            return Err(err);
        }

        Ok(())
    }

    /// Under the legacy protocol, consume the EOF packet that terminates a
    /// block of column definitions. Elided when `DEPRECATE_EOF` was
    /// negotiated.
    pub(crate) async fn maybe_recv_eof(&mut self) -> Result<Option<EofPacket>> {
        if self.capabilities.contains(Capabilities::DEPRECATE_EOF) {
            return Ok(None);
        }

        let payload = self.recv_packet().await?;
        self.maybe_err(&payload)?;

        let eof = EofPacket::decode_with(payload, self.capabilities)?;
        self.server_status = eof.status;

        Ok(Some(eof))
    }

    /// `true` when this packet terminates a row stream: a legacy EOF, or
    /// the EOF-flavored OK that replaces it under `DEPRECATE_EOF`.
    pub(crate) fn is_eof_packet(&self, payload: &[u8]) -> bool {
        payload[0] == 0xfe && payload.len() < 9
    }

    /// Parse a row-stream terminator and absorb its status flags. Accepts
    /// both terminator encodings regardless of what was negotiated.
    pub(crate) fn handle_eof_packet(&mut self, payload: Bytes) -> Result<Status> {
        let status = if self.capabilities.contains(Capabilities::DEPRECATE_EOF) {
            OkPacket::decode(payload)?.status
        } else {
            EofPacket::decode_with(payload, self.capabilities)?.status
        };

        self.server_status = status;

        Ok(status)
    }

    /// Drain any response packets still owed by the server so the next
    /// command starts from a clean exchange.
    pub(crate) async fn wait_until_ready(&mut self) -> Result<()> {
        if !self.wbuf.is_empty() {
            self.flush().await?;
        }

        while self.busy != Busy::NotBusy {
            let payload = self.recv_packet().await?;

            match self.busy {
                Busy::Row => {
                    if self.is_eof_packet(&payload) {
                        let status = self.handle_eof_packet(payload)?;

                        self.busy = if status.contains(Status::SERVER_MORE_RESULTS_EXISTS) {
                            Busy::Result
                        } else {
                            Busy::NotBusy
                        };
                    }

                    // otherwise: a row we are discarding
                }

                Busy::Result => {
                    if payload[0] == 0x00 {
                        let status = OkPacket::decode(payload)?.status;

                        self.busy = if status.contains(Status::SERVER_MORE_RESULTS_EXISTS) {
                            Busy::Result
                        } else {
                            Busy::NotBusy
                        };
                    } else if payload[0] == 0xff {
                        // the abandoned command failed; nothing further follows
                        self.busy = Busy::NotBusy;
                    } else {
                        // a column count; column definitions and rows follow
                        self.busy = Busy::Row;
                    }
                }

                Busy::NotBusy => unreachable!(),
            }
        }

        Ok(())
    }

    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        self.socket.shutdown().await.map_err(Error::Io)
    }
}

/// Split a payload into frames of at most `MAX_PAYLOAD_LEN` bytes, each
/// with a 3-byte little-endian length and the next sequence id. A payload
/// that is an exact (non-zero) multiple of the maximum is followed by an
/// empty frame so the reader knows the sequence ended.
fn write_frames(wbuf: &mut Vec<u8>, sequence_id: &mut u8, payload: &[u8]) {
    let mut chunks = payload.chunks(MAX_PAYLOAD_LEN);
    let mut wrote_max = false;

    loop {
        let chunk = match chunks.next() {
            Some(chunk) => chunk,

            // terminating empty frame after a maximal one, or the whole
            // payload was empty (a bare empty packet is legal, e.g. the
            // LOCAL INFILE refusal)
            None if wrote_max || payload.is_empty() => &[][..],

            None => break,
        };

        wbuf.extend_from_slice(&(chunk.len() as u32).to_le_bytes()[..3]);
        wbuf.push(*sequence_id);
        *sequence_id = sequence_id.wrapping_add(1);
        wbuf.extend_from_slice(chunk);

        wrote_max = chunk.len() == MAX_PAYLOAD_LEN;

        if !wrote_max {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{write_frames, MAX_PAYLOAD_LEN};

    fn frames(buf: &[u8]) -> Vec<(usize, u8)> {
        let mut frames = Vec::new();
        let mut offset = 0;

        while offset < buf.len() {
            let len = u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], 0])
                as usize;
            let seq = buf[offset + 3];

            frames.push((len, seq));
            offset += 4 + len;
        }

        frames
    }

    #[test]
    fn a_short_payload_fits_one_frame() {
        let mut wbuf = Vec::new();
        let mut seq = 0;

        write_frames(&mut wbuf, &mut seq, &vec![0xaa; MAX_PAYLOAD_LEN - 1]);

        assert_eq!(frames(&wbuf), [(MAX_PAYLOAD_LEN - 1, 0)]);
        assert_eq!(seq, 1);
    }

    #[test]
    fn a_maximal_payload_needs_a_trailing_empty_frame() {
        let mut wbuf = Vec::new();
        let mut seq = 0;

        write_frames(&mut wbuf, &mut seq, &vec![0xaa; MAX_PAYLOAD_LEN]);

        assert_eq!(frames(&wbuf), [(MAX_PAYLOAD_LEN, 0), (0, 1)]);
    }

    #[test]
    fn an_oversized_payload_is_split() {
        let mut wbuf = Vec::new();
        let mut seq = 0;

        write_frames(&mut wbuf, &mut seq, &vec![0xaa; MAX_PAYLOAD_LEN + 5]);

        assert_eq!(frames(&wbuf), [(MAX_PAYLOAD_LEN, 0), (5, 1)]);
    }

    #[test]
    fn the_sequence_id_wraps_at_256() {
        let mut wbuf = Vec::new();
        let mut seq = 255;

        write_frames(&mut wbuf, &mut seq, b"x");

        assert_eq!(frames(&wbuf), [(1, 255)]);
        assert_eq!(seq, 0);
    }

    #[test]
    fn an_empty_payload_writes_an_empty_frame() {
        let mut wbuf = Vec::new();
        let mut seq = 3;

        write_frames(&mut wbuf, &mut seq, b"");

        assert_eq!(frames(&wbuf), [(0, 3)]);
        assert_eq!(seq, 4);
    }
}
