//! WebSocket connection over an upgraded byte stream.
//!
//! The handshake is done by the HTTP layer; this module takes the raw
//! stream it hands over and speaks RFC 6455 framing on it. The stream is
//! split in two:
//!
//! - a [`WebSocketReader`] that decodes frames, joins fragments, answers
//!   pings and yields complete data messages;
//! - a [`WebSocketWriter`] that drains an outbound frame queue.
//!
//! The queue's strong [`mpsc::Sender`] is returned to the caller. When the
//! last strong sender is dropped the writer sends a close frame and shuts
//! the stream down; the reader only holds a weak handle so it never keeps
//! the connection open by itself.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use webhub_protocol::{Assembler, Frame, FrameCodec, Message, OpCode};

use crate::connection::{ConnectionId, TransportError};

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum payload of a single frame.
    pub max_frame_size: usize,
    /// Maximum size of a reassembled message.
    pub max_message_size: usize,
    /// Capacity of the outbound frame queue.
    pub outbound_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: webhub_protocol::codec::DEFAULT_MAX_PAYLOAD,
            max_message_size: webhub_protocol::reassembly::DEFAULT_MAX_MESSAGE,
            outbound_capacity: 1024,
        }
    }
}

/// Split an upgraded stream into a reader, a writer and the outbound queue.
pub fn split<S>(
    stream: S,
    config: &WebSocketConfig,
) -> (
    WebSocketReader<ReadHalf<S>>,
    WebSocketWriter<WriteHalf<S>>,
    mpsc::Sender<Frame>,
)
where
    S: AsyncRead + AsyncWrite,
{
    let id = ConnectionId::generate();
    let (read_half, write_half) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(config.outbound_capacity);

    let reader = WebSocketReader {
        id: id.clone(),
        reader: read_half,
        buffer: BytesMut::with_capacity(4096),
        codec: FrameCodec::new(config.max_frame_size),
        assembler: Assembler::new(config.max_message_size),
        outbound: tx.downgrade(),
        closed: false,
    };
    let writer = WebSocketWriter {
        id,
        writer: write_half,
        outbound: rx,
    };
    (reader, writer, tx)
}

/// Inbound half of a connection.
pub struct WebSocketReader<R> {
    id: ConnectionId,
    reader: R,
    buffer: BytesMut,
    codec: FrameCodec,
    assembler: Assembler,
    outbound: mpsc::WeakSender<Frame>,
    closed: bool,
}

impl<R> WebSocketReader<R>
where
    R: AsyncRead + Unpin,
{
    /// The connection's ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Receive the next complete data message.
    ///
    /// Pings are answered with a pong carrying the same payload and pongs
    /// are ignored; neither disturbs a fragmented message in progress.
    /// Returns `Ok(None)` once the peer closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or a protocol violation; the
    /// connection should be closed afterwards.
    pub async fn next_message(&mut self) -> Result<Option<Message>, TransportError> {
        if self.closed {
            return Ok(None);
        }

        loop {
            while let Some(frame) = self.codec.decode_from(&mut self.buffer)? {
                trace!(
                    connection = %self.id,
                    opcode = ?frame.opcode,
                    len = frame.payload.len(),
                    "Frame received"
                );
                match self.assembler.push(frame)? {
                    Some(Message::Ping(payload)) => self.queue(Frame::pong(payload)).await,
                    Some(Message::Pong(_)) | None => {}
                    Some(Message::Close(_)) => {
                        debug!(connection = %self.id, "Received close frame");
                        self.closed = true;
                        self.queue(Frame::close()).await;
                        return Ok(None);
                    }
                    Some(message) => return Ok(Some(message)),
                }
            }

            let n = self.reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                debug!(connection = %self.id, "WebSocket stream ended");
                self.closed = true;
                return Ok(None);
            }
        }
    }

    async fn queue(&mut self, frame: Frame) {
        let Some(tx) = self.outbound.upgrade() else {
            return;
        };
        if tx.send(frame).await.is_err() {
            warn!(connection = %self.id, "Outbound queue closed");
        }
    }
}

/// Outbound half of a connection.
pub struct WebSocketWriter<W> {
    id: ConnectionId,
    writer: W,
    outbound: mpsc::Receiver<Frame>,
}

impl<W> WebSocketWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// The connection's ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Write queued frames until a close frame is sent or the queue closes,
    /// then shut the stream down.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the stream fails.
    pub async fn run(mut self) -> Result<(), TransportError> {
        while let Some(frame) = self.outbound.recv().await {
            let close = frame.opcode == OpCode::Close;
            self.write(&frame).await?;
            if close {
                debug!(connection = %self.id, "Sent close frame");
                return self.shutdown().await;
            }
        }

        debug!(connection = %self.id, "Outbound queue closed, closing connection");
        self.write(&Frame::close()).await?;
        self.shutdown().await
    }

    async fn write(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let encoded = webhub_protocol::encode(frame);
        self.writer.write_all(&encoded).await?;
        self.writer.flush().await?;
        trace!(
            connection = %self.id,
            opcode = ?frame.opcode,
            len = frame.payload.len(),
            "Frame sent"
        );
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.outbound.close();
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{duplex, DuplexStream};
    use webhub_protocol::codec::{decode_from, encode_masked, DEFAULT_MAX_PAYLOAD};

    const KEY: [u8; 4] = [1, 2, 3, 4];

    async fn send(client: &mut DuplexStream, frame: Frame) {
        client.write_all(&encode_masked(&frame, KEY)).await.unwrap();
    }

    async fn recv(client: &mut DuplexStream, buf: &mut BytesMut) -> Frame {
        loop {
            if let Some(frame) = decode_from(buf, DEFAULT_MAX_PAYLOAD).unwrap() {
                return frame;
            }
            let n = client.read_buf(buf).await.unwrap();
            assert!(n > 0, "stream ended");
        }
    }

    #[test]
    fn test_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
        assert_eq!(config.outbound_capacity, 1024);
    }

    #[tokio::test]
    async fn test_text_message() {
        let (mut client, server) = duplex(4096);
        let (mut reader, _writer, _tx) = split(server, &WebSocketConfig::default());

        send(&mut client, Frame::text(r#"{"id":"1","action":"go"}"#)).await;
        let message = reader.next_message().await.unwrap();
        assert_eq!(
            message,
            Some(Message::Text(r#"{"id":"1","action":"go"}"#.to_string()))
        );
    }

    #[tokio::test]
    async fn test_ping_between_fragments() {
        let (mut client, server) = duplex(4096);
        let (mut reader, writer, tx) = split(server, &WebSocketConfig::default());
        tokio::spawn(writer.run());

        send(&mut client, Frame::new(false, OpCode::Text, "hel")).await;
        send(&mut client, Frame::ping("are you there")).await;
        send(&mut client, Frame::continuation(true, "lo")).await;

        let message = reader.next_message().await.unwrap();
        assert_eq!(message, Some(Message::Text("hello".to_string())));

        let mut buf = BytesMut::new();
        let pong = recv(&mut client, &mut buf).await;
        assert_eq!(pong.opcode, OpCode::Pong);
        assert_eq!(pong.payload, Bytes::from_static(b"are you there"));
        drop(tx);
    }

    #[tokio::test]
    async fn test_outbound_frames_unmasked() {
        let (mut client, server) = duplex(4096);
        let (_reader, writer, tx) = split(server, &WebSocketConfig::default());
        tokio::spawn(writer.run());

        tx.send(Frame::text(r#"{"property":"on","data":true}"#)).await.unwrap();

        let mut raw = [0u8; 2];
        client.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw[0], 0x81);
        assert_eq!(raw[1] & 0x80, 0);
    }

    #[tokio::test]
    async fn test_close_is_echoed() {
        let (mut client, server) = duplex(4096);
        let (mut reader, writer, tx) = split(server, &WebSocketConfig::default());
        let writer = tokio::spawn(writer.run());

        send(&mut client, Frame::close()).await;
        assert_eq!(reader.next_message().await.unwrap(), None);
        assert_eq!(reader.next_message().await.unwrap(), None);

        let mut buf = BytesMut::new();
        assert_eq!(recv(&mut client, &mut buf).await.opcode, OpCode::Close);
        writer.await.unwrap().unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn test_dropping_sender_closes_connection() {
        let (mut client, server) = duplex(4096);
        let (_reader, writer, tx) = split(server, &WebSocketConfig::default());
        let writer = tokio::spawn(writer.run());

        drop(tx);
        writer.await.unwrap().unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(recv(&mut client, &mut buf).await.opcode, OpCode::Close);
    }

    #[tokio::test]
    async fn test_peer_eof() {
        let (client, server) = duplex(4096);
        let (mut reader, _writer, _tx) = split(server, &WebSocketConfig::default());
        drop(client);
        assert_eq!(reader.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let (mut client, server) = duplex(4096);
        let config = WebSocketConfig {
            max_message_size: 8,
            ..WebSocketConfig::default()
        };
        let (mut reader, _writer, _tx) = split(server, &config);

        send(&mut client, Frame::text("0123456789")).await;
        let err = reader.next_message().await.unwrap_err();
        assert!(err.is_too_large());
    }
}
