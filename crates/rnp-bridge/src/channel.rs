//! Raw message transport between the two processes
//!
//! A [`ChannelEnd`] only moves [`BridgeMessage`]s: it preserves send order per
//! direction and has no notion of calls or responses. Two transports exist:
//!
//! - [`in_memory_pair`] - two connected ends in one process (tests, embedding)
//! - [`ndjson`] - one JSON message per line over any async byte stream
//!   (the controller's stdin/stdout)
//!
//! The channel is torn down when the peer goes away: [`ChannelEnd::recv`]
//! then returns `None`.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::message::BridgeMessage;
use rnp_core::prelude::*;

/// One side of a bidirectional message channel
#[derive(Debug)]
pub struct ChannelEnd {
    outbound: mpsc::UnboundedSender<BridgeMessage>,
    inbound: mpsc::UnboundedReceiver<BridgeMessage>,
}

impl ChannelEnd {
    /// Post a message to the peer. Fails only once the peer is gone.
    pub fn send(&self, message: BridgeMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| Error::ChannelClosed)
    }

    /// Next message from the peer, or `None` once the channel is closed
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        self.inbound.recv().await
    }

    /// Split into the raw sender and receiver halves
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<BridgeMessage>,
        mpsc::UnboundedReceiver<BridgeMessage>,
    ) {
        (self.outbound, self.inbound)
    }
}

/// Two ends connected back to back
pub fn in_memory_pair() -> (ChannelEnd, ChannelEnd) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        ChannelEnd {
            outbound: a_tx,
            inbound: a_rx,
        },
        ChannelEnd {
            outbound: b_tx,
            inbound: b_rx,
        },
    )
}

/// Channel over a pair of byte streams, one JSON message per line.
///
/// Lines that are not UTF-8 or not a valid message are logged and skipped; a
/// malformed `call` whose `callId` can still be read is answered with a
/// protocol error. Only EOF or an I/O error on `reader` closes the inbound
/// half; a write error stops the writer task.
pub fn ndjson<R, W>(reader: R, writer: W) -> ChannelEnd
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    tokio::spawn(line_reader(reader, in_tx, out_tx.clone()));
    tokio::spawn(line_writer(writer, out_rx));

    ChannelEnd {
        outbound: out_tx,
        inbound: in_rx,
    }
}

/// Channel over the current process's stdin/stdout
pub fn stdio() -> ChannelEnd {
    ndjson(tokio::io::stdin(), tokio::io::stdout())
}

async fn line_reader<R>(
    reader: R,
    tx: mpsc::UnboundedSender<BridgeMessage>,
    replies: mpsc::UnboundedSender<BridgeMessage>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read from channel: {}", e);
                break;
            }
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                warn!("Skipping line that is not UTF-8: {}", e);
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        trace!("<- {}", line.trim_end());

        match BridgeMessage::from_line(line) {
            Ok(message) => {
                if tx.send(message).is_err() {
                    debug!("inbound receiver dropped");
                    break;
                }
            }
            Err(e) => {
                warn!("Skipping line: {}", e);
                if let Some(call_id) = BridgeMessage::malformed_call_id(line) {
                    let _ = replies.send(BridgeMessage::call_result(call_id, Err(e)));
                }
            }
        }
    }

    info!("channel reader finished");
}

async fn line_writer<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<BridgeMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize {} message: {}", message.command(), e);
                continue;
            }
        };
        trace!("-> {}", line);

        if let Err(e) = writer.write_all(line.as_bytes()).await {
            error!("Failed to write to channel: {}", e);
            break;
        }
        if let Err(e) = writer.write_all(b"\n").await {
            error!("Failed to write newline: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            error!("Failed to flush channel: {}", e);
            break;
        }
    }

    debug!("channel writer finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_pair_preserves_order() {
        let (a, mut b) = in_memory_pair();

        for id in 1..=3 {
            a.send(BridgeMessage::Callback {
                callback_id: id,
                args: vec![],
            })
            .unwrap();
        }

        for expected in 1..=3 {
            match b.recv().await {
                Some(BridgeMessage::Callback { callback_id, .. }) => {
                    assert_eq!(callback_id, expected)
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_dropping_peer_closes_channel() {
        let (mut a, b) = in_memory_pair();
        drop(b);

        assert!(a.recv().await.is_none());
        assert!(matches!(
            a.send(BridgeMessage::Callback {
                callback_id: 1,
                args: vec![]
            }),
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_ndjson_reads_and_writes_lines() {
        let (controller_io, ui_io) = tokio::io::duplex(4096);
        let (controller_read, controller_write) = tokio::io::split(controller_io);
        let mut channel = ndjson(controller_read, controller_write);

        let (ui_read, mut ui_write) = tokio::io::split(ui_io);
        ui_write
            .write_all(b"{\"command\":\"callback\",\"callbackId\":7,\"args\":[1]}\nnot json\n\n")
            .await
            .unwrap();
        ui_write
            .write_all(b"{\"command\":\"callResult\",\"callId\":1,\"result\":null}\n")
            .await
            .unwrap();

        assert_eq!(
            channel.recv().await,
            Some(BridgeMessage::Callback {
                callback_id: 7,
                args: vec![json!(1)],
            })
        );
        // The malformed and blank lines are skipped
        assert!(matches!(
            channel.recv().await,
            Some(BridgeMessage::CallResult { call_id: 1, .. })
        ));

        channel
            .send(BridgeMessage::call_result(5, Ok(json!("ok"))))
            .unwrap();
        let mut lines = BufReader::new(ui_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, r#"{"command":"callResult","callId":5,"result":"ok"}"#);
    }

    #[tokio::test]
    async fn test_ndjson_rejects_malformed_call() {
        let (controller_io, ui_io) = tokio::io::duplex(4096);
        let (controller_read, controller_write) = tokio::io::split(controller_io);
        let mut channel = ndjson(controller_read, controller_write);

        let (ui_read, mut ui_write) = tokio::io::split(ui_io);
        ui_write
            .write_all(b"{\"command\":\"call\",\"callId\":5,\"object\":\"test\"}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(ui_read).lines();
        let line = tokio::time::timeout(std::time::Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let reply: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["command"], "callResult");
        assert_eq!(reply["callId"], 5);
        assert_eq!(reply["error"]["kind"], "protocol");

        // Never handed to the bridge
        drop(lines);
        drop(ui_write);
        assert!(channel.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_ndjson_survives_invalid_utf8() {
        let (controller_io, ui_io) = tokio::io::duplex(4096);
        let (controller_read, controller_write) = tokio::io::split(controller_io);
        let mut channel = ndjson(controller_read, controller_write);

        let (_ui_read, mut ui_write) = tokio::io::split(ui_io);
        ui_write.write_all(b"\xff\xfe garbage\n").await.unwrap();
        ui_write
            .write_all(b"{\"command\":\"callback\",\"callbackId\":3}\n")
            .await
            .unwrap();

        assert_eq!(
            channel.recv().await,
            Some(BridgeMessage::Callback {
                callback_id: 3,
                args: vec![],
            })
        );
    }

    #[tokio::test]
    async fn test_ndjson_eof_closes_inbound() {
        let (controller_io, ui_io) = tokio::io::duplex(64);
        let (controller_read, controller_write) = tokio::io::split(controller_io);
        let mut channel = ndjson(controller_read, controller_write);

        drop(ui_io);
        assert!(channel.recv().await.is_none());
    }
}
