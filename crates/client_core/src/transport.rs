//! Realtime stream transport: one websocket per open room.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::{stream::SplitStream, SinkExt, StreamExt};
use thiserror::Error;
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

pub const REALTIME_PATH: &str = "/ws";

pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,
    #[error("server_url must start with http:// or https://, got {0}")]
    UnsupportedScheme(String),
    #[error("invalid realtime url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to connect websocket {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
}

/// Outbound half of the realtime stream as seen by the room session.
pub trait Transport {
    fn is_open(&self) -> bool;
    /// Queues one text frame. Delivery is not acknowledged.
    fn send_text(&mut self, frame: String) -> Result<(), TransportError>;
    fn close(&mut self);
}

/// Transport used before a connection exists or after it is gone.
pub struct Disconnected;

impl Transport for Disconnected {
    fn is_open(&self) -> bool {
        false
    }

    fn send_text(&mut self, _frame: String) -> Result<(), TransportError> {
        Err(TransportError::NotOpen)
    }

    fn close(&mut self) {}
}

/// Derives the realtime endpoint from the REST base url, keeping the
/// secure/insecure choice of the page.
pub fn websocket_url(server_url: &str) -> Result<Url, TransportError> {
    let server_url = server_url.trim().trim_end_matches('/');
    let ws_base = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(TransportError::UnsupportedScheme(server_url.to_string()));
    };
    Ok(Url::parse(&format!("{ws_base}{REALTIME_PATH}"))?)
}

pub struct WsTransport {
    outbound: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
    writer_task: JoinHandle<()>,
}

impl WsTransport {
    /// Opens the websocket. Returning `Ok` is the transport's "open" event.
    pub async fn connect(url: &Url) -> Result<(Self, WsReader), TransportError> {
        let (ws_stream, _) =
            connect_async(url.as_str())
                .await
                .map_err(|source| TransportError::Connect {
                    url: url.to_string(),
                    source,
                })?;
        let (mut ws_sender, ws_reader) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let open = Arc::new(AtomicBool::new(true));
        let writer_open = Arc::clone(&open);

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(err) = ws_sender.send(msg).await {
                    warn!("realtime: send failed: {err}");
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_open.store(false, Ordering::SeqCst);
            let _ = ws_sender.close().await;
            debug!("realtime: writer stopped");
        });

        Ok((
            Self {
                outbound,
                open,
                writer_task,
            },
            ws_reader,
        ))
    }

    /// Records that the peer closed the stream or it failed.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Transport for WsTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.writer_task.is_finished()
    }

    fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(Message::Text(frame))
            .map_err(|_| TransportError::NotOpen)
    }

    fn close(&mut self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(Message::Close(None));
        }
    }
}
