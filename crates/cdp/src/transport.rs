//! Transport - the single duplex channel to the browser process
//!
//! Design decisions:
//! 1. One transport per connection; every session shares it
//! 2. Outbound frames go through `Transport::send`, inbound frames arrive on
//!    an unbounded channel in receipt order - no reordering, no batching
//! 3. `TransportEvent::Closed` fires exactly once, carrying the underlying
//!    cause when the close was not clean

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::TransportError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// One frame off the wire, or the end of the channel.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete inbound frame, delivered in receipt order.
    Message(String),
    /// The channel ended. Delivered exactly once; carries the underlying
    /// cause when the close was abnormal.
    Closed(Option<String>),
}

/// Inbound side of a transport.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Outbound side of the channel to the browser.
///
/// Implementations frame one message per `send` call and preserve send
/// order. `send` fails once the channel is closed.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Shut the channel down. The event stream sees `Closed` exactly once.
    async fn close(&self) -> Result<(), TransportError>;
}

/// WebSocket transport to a browser's DevTools endpoint.
pub struct WebSocketTransport {
    sink: RwLock<WsSink>,
    closed: AtomicBool,
}

impl WebSocketTransport {
    /// Dial the endpoint and spawn the read pump.
    pub async fn connect(ws_url: &str) -> Result<(Arc<Self>, TransportEvents), TransportError> {
        let url = Url::parse(ws_url)?;
        tracing::info!(url = %url, "connecting to browser endpoint");

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (sink, mut stream) = ws_stream.split();

        let transport = Arc::new(Self {
            sink: RwLock::new(sink),
            closed: AtomicBool::new(false),
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pump = transport.clone();
        tokio::spawn(async move {
            let cause = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if events_tx.send(TransportEvent::Message(text)).is_err() {
                            break None;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| f.reason.to_string());
                    }
                    Some(Ok(_)) => {} // ping/pong handled by tungstenite
                    Some(Err(err)) => break Some(err.to_string()),
                    None => break None,
                }
            };
            pump.closed.store(true, Ordering::SeqCst);
            tracing::info!(?cause, "browser endpoint closed");
            let _ = events_tx.send(TransportEvent::Closed(cause));
        });

        Ok((transport, events_rx))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        let mut sink = self.sink.write().await;
        sink.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.sink.write().await;
        sink.close().await?;
        Ok(())
    }
}

/// In-memory transport for tests and embedders that bring their own channel
/// to the browser process.
pub struct PipeTransport {
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
}

/// Peer half of [`pipe`]: observe outbound frames, inject inbound traffic.
pub struct PipePeer {
    /// Frames written by the connection, in send order.
    pub outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl PipePeer {
    /// Inject one inbound frame toward the connection.
    pub fn deliver(&self, text: impl Into<String>) {
        let _ = self.inbound.send(TransportEvent::Message(text.into()));
    }

    /// End the channel from the peer side.
    pub fn drop_connection(&self, cause: Option<String>) {
        let _ = self.inbound.send(TransportEvent::Closed(cause));
    }

    /// Next frame the connection wrote, if any.
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.outbound.recv().await
    }
}

/// Build a connected in-memory transport pair.
pub fn pipe() -> (Arc<PipeTransport>, TransportEvents, PipePeer) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(PipeTransport {
        outbound: outbound_tx,
        events: inbound_tx.clone(),
        closed: AtomicBool::new(false),
    });
    let peer = PipePeer {
        outbound: outbound_rx,
        inbound: inbound_tx,
    };
    (transport, inbound_rx, peer)
}

#[async_trait]
impl Transport for PipeTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.outbound
            .send(text)
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Closed(None));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn pipe_preserves_send_order() {
        let (transport, _events, mut peer) = pipe();

        assert_ok!(transport.send("one".to_string()).await);
        assert_ok!(transport.send("two".to_string()).await);
        assert_ok!(transport.send("three".to_string()).await);

        assert_eq!(peer.next_outbound().await.as_deref(), Some("one"));
        assert_eq!(peer.next_outbound().await.as_deref(), Some("two"));
        assert_eq!(peer.next_outbound().await.as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn pipe_rejects_send_after_close() {
        let (transport, mut events, _peer) = pipe();

        assert_ok!(transport.close().await);
        assert!(matches!(
            transport.send("late".to_string()).await,
            Err(TransportError::ChannelClosed)
        ));

        match events.recv().await {
            Some(TransportEvent::Closed(None)) => {}
            other => panic!("expected clean close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pipe_close_fires_once() {
        let (transport, mut events, _peer) = pipe();

        assert_ok!(transport.close().await);
        assert_ok!(transport.close().await);

        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Closed(None))
        ));
        drop(transport);
        drop(_peer);
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn peer_injects_frames_in_order() {
        let (_transport, mut events, peer) = pipe();

        peer.deliver("a");
        peer.deliver("b");

        match events.recv().await {
            Some(TransportEvent::Message(text)) => assert_eq!(text, "a"),
            other => panic!("unexpected {other:?}"),
        }
        match events.recv().await {
            Some(TransportEvent::Message(text)) => assert_eq!(text, "b"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
