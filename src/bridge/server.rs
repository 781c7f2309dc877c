//! WebSocket server
//!
//! Accepts client links, optionally checks the access token carried by the
//! first frame, then runs one event loop per link. The loop owns the link's
//! `LinkDispatcher`; a separate sender task serializes outbound messages so a
//! slow client never blocks inbound processing.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use subtle::ConstantTimeEq;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dispatcher::LinkDispatcher;
use super::protocol::ServerMessage;
use crate::config::GatewayConfig;
use crate::gateway::{Connector, GatewayEvent};

/// Time a client has to present the access token
const AUTH_TIMEOUT: Duration = Duration::from_secs(5);
/// A client that cannot take a frame within this long is treated as dead
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// How long the final messages of a closing link may take to flush
const LINK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub struct WsGateway {
    config: GatewayConfig,
    connector: Arc<dyn Connector>,
    /// Live links, keyed by link id
    links: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
}

impl WsGateway {
    pub fn new(config: GatewayConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            links: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(&self.config.bind).await
    }

    /// Accept links until [`WsGateway::shutdown`] is called
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        let addr = listener.local_addr()?;
        info!(
            "Gateway listening on ws://{} (access token {})",
            addr,
            if self.config.access_token.is_some() {
                "required"
            } else {
                "disabled"
            }
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let gateway = self.clone();
                        tokio::spawn(async move { gateway.handle_link(stream, peer).await });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
            }
        }

        info!("Gateway stopped accepting links");
        Ok(())
    }

    /// Stop accepting and close every link; each link disconnects its SSH connection
    pub fn shutdown(&self) {
        info!("Shutting down gateway ({} links)", self.links.len());
        self.shutdown.cancel();
    }

    /// Wait until every link has finished, up to `deadline`
    pub async fn wait_idle(&self, deadline: Duration) -> bool {
        let wait = async {
            while !self.links.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(deadline, wait).await.is_ok()
    }

    fn ws_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.config.max_message_bytes);
        config.max_frame_size = Some(self.config.max_message_bytes);
        config
    }

    async fn handle_link(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);

        let ws_stream = match accept_async_with_config(stream, Some(self.ws_config())).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!("WebSocket handshake with {} failed: {}", peer, e);
                return;
            }
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        if let Some(expected) = self.config.access_token.as_deref() {
            if let Err(reason) = authenticate(&mut ws_receiver, expected).await {
                warn!("Rejected link from {}: {}", peer, reason);
                let _ = tokio::time::timeout(SEND_TIMEOUT, ws_sender.close()).await;
                return;
            }
            debug!("Link from {} authenticated", peer);
        }

        let link_id = Uuid::new_v4().to_string();
        let cancel = self.shutdown.child_token();
        self.links.insert(link_id.clone(), cancel.clone());
        info!("[{}] Link opened from {}", link_id, peer);

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let sender_task = tokio::spawn(send_loop(
            link_id.clone(),
            ws_sender,
            out_rx,
            cancel.clone(),
        ));

        let (mut dispatcher, mut link_events) =
            LinkDispatcher::new(link_id.clone(), self.connector.clone(), &self.config, out_tx);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("[{}] Link cancelled", link_id);
                    break;
                }
                frame = ws_receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => dispatcher.handle_text(&text),
                    Some(Ok(Message::Binary(_))) => {
                        dispatcher.report("Binary frames are not supported".to_string());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("[{}] Client closed the link", link_id);
                        break;
                    }
                    // ping/pong are answered by the transport
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("[{}] WebSocket receive error: {}", link_id, e);
                        break;
                    }
                },
                Some(event) = link_events.recv() => dispatcher.handle_event(event),
            }
        }

        // Emits the final session_closed / disconnected messages, then drops
        // the last outbound sender so the sender task can flush and close.
        dispatcher.shutdown();
        drop(dispatcher);

        match tokio::time::timeout(LINK_DRAIN_TIMEOUT, sender_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("[{}] Sender task failed: {}", link_id, e),
            Err(_) => warn!("[{}] Timed out flushing final messages", link_id),
        }

        self.links.remove(&link_id);
        info!("[{}] Link closed", link_id);
    }
}

/// Read the first frame and compare it to the access token in constant time
async fn authenticate<S>(ws_receiver: &mut S, expected: &str) -> Result<(), &'static str>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    match tokio::time::timeout(AUTH_TIMEOUT, ws_receiver.next()).await {
        Ok(Some(Ok(Message::Text(token)))) => {
            if token_matches(&token, expected) {
                Ok(())
            } else {
                Err("invalid access token")
            }
        }
        Ok(Some(Ok(_))) => Err("first frame was not a text token"),
        Ok(Some(Err(_))) => Err("transport error before authentication"),
        Ok(None) => Err("closed before authentication"),
        Err(_) => Err("authentication timeout"),
    }
}

fn token_matches(received: &str, expected: &str) -> bool {
    received.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Serialize outbound events until the dispatcher goes away, then close the socket
async fn send_loop(
    link_id: String,
    mut ws_sender: WsSink,
    mut out_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    cancel: CancellationToken,
) {
    while let Some(event) = out_rx.recv().await {
        let message = ServerMessage::from(event);
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                error!("[{}] Failed to encode {:?}: {}", link_id, message, e);
                continue;
            }
        };

        match tokio::time::timeout(SEND_TIMEOUT, ws_sender.send(Message::Text(text))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("[{}] WebSocket send failed: {}", link_id, e);
                cancel.cancel();
                return;
            }
            Err(_) => {
                warn!(
                    "[{}] WebSocket send timeout after {:?} - client unresponsive, closing link",
                    link_id, SEND_TIMEOUT
                );
                cancel.cancel();
                return;
            }
        }
    }

    let _ = tokio::time::timeout(SEND_TIMEOUT, ws_sender.close()).await;
    debug!("[{}] WebSocket sender task stopped", link_id);
}
