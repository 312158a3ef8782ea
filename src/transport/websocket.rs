//! WebSocket transport
//!
//! Every connection carries binary frames, and every frame is a correlation
//! packet whose id is the local message id the sending side assigned.
//! Text and ping/pong frames are ignored.
//!
//! Server side: `bind` + `serve` accept connections, give each one an
//! address of the form `client-<uuid>` and feed its events to the `Broker`.
//! Client side: `connect` dials a broker and returns a `Link` for a
//! producer or consumer to drive.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{accept_async, connect_async};
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::Broker;
use crate::endpoint::{Address, Endpoint, EndpointEvent, EndpointRef, Link};
use crate::protocol::Packet;
use crate::utils::{Error, Result};

/// One WebSocket connection, seen from the local side.
#[derive(Debug)]
pub struct WsEndpoint {
    address: Address,
    sender: UnboundedSender<WsMessage>,
    next_id: AtomicU32,
    closed: AtomicBool,
}

impl WsEndpoint {
    fn new(address: impl Into<Address>, sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            address: address.into(),
            sender,
            next_id: AtomicU32::new(1),
            closed: AtomicBool::new(false),
        }
    }
}

impl Endpoint for WsEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    fn send(&self, data: Bytes) -> Result<u32> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SendFailure(format!("{} closed", self.address)));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = Packet::new(id, data).encode();
        self.sender
            .send(WsMessage::binary(frame))
            .map_err(Error::send)?;
        Ok(id)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.sender.send(WsMessage::Close(None));
        }
    }
}

pub async fn bind(addr: &str) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, broker: Arc<Broker>) {
    match listener.local_addr() {
        Ok(addr) => info!("WebSocket server listening on ws://{addr}"),
        Err(e) => warn!("WebSocket server listening on unknown address: {e}"),
    }

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_connection(stream, broker.clone()));
            }
            Err(e) => {
                error!("accept failed: {e}");
                return;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, broker: Arc<Broker>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };
    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();

    let endpoint: EndpointRef = Arc::new(WsEndpoint::new(
        format!("client-{}", Uuid::new_v4()),
        tx,
    ));
    let address = endpoint.address().to_string();
    broker.handle_event(&endpoint, EndpointEvent::Connected);

    spawn_send_loop(address.clone(), ws_sender, rx);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if msg.is_close() {
            break;
        }
        if let Some(event) = frame_to_event(&address, msg) {
            broker.handle_event(&endpoint, event);
        }
    }

    debug!("{address} disconnected");
    broker.handle_event(&endpoint, EndpointEvent::Disconnected);
}

/// Dial a broker. The returned link's endpoint is addressed by `url`.
pub async fn connect(url: &str) -> Result<Link> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;
    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let (event_tx, events) = mpsc::unbounded_channel();

    let endpoint: EndpointRef = Arc::new(WsEndpoint::new(url, tx));
    let _ = event_tx.send(EndpointEvent::Connected);

    spawn_send_loop(url.to_string(), ws_sender, rx);

    let address = url.to_string();
    tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if msg.is_close() {
                break;
            }
            if let Some(event) = frame_to_event(&address, msg) {
                if event_tx.send(event).is_err() {
                    return;
                }
            }
        }
        let _ = event_tx.send(EndpointEvent::Disconnected);
    });

    Ok(Link { endpoint, events })
}

fn spawn_send_loop<S>(address: String, mut ws_sender: S, mut rx: UnboundedReceiver<WsMessage>)
where
    S: Sink<WsMessage> + Unpin + Send + 'static,
    S::Error: fmt::Display,
{
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = msg.is_close();
            if let Err(e) = ws_sender.send(msg).await {
                warn!("Failed to send message to {address}: {e}");
                break;
            }
            if closing {
                break;
            }
        }
        debug!("Send loop closed for {address}");
    });
}

fn frame_to_event(address: &str, msg: WsMessage) -> Option<EndpointEvent> {
    match msg {
        WsMessage::Binary(data) => match Packet::decode(&data) {
            Ok(packet) => Some(EndpointEvent::DataReceived {
                id: packet.id,
                data: packet.payload,
            }),
            Err(e) => {
                warn!("Invalid frame from {address}: {e}");
                None
            }
        },
        _ => None,
    }
}
