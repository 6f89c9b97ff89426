//! Shared helpers for client integration tests.
//!
//! `MemoryTransport` hands each opened socket's server side to the test,
//! which plays the JSONAPI server by reading frames and writing replies.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

use jsonapi_rcon::rcon::{RconError, Transport, TransportLink};
use jsonapi_rcon::{ClientConfig, Credentials, RconClient};

/// Test timeout to prevent hanging tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Server side of one in-memory socket.
pub struct ServerSocket {
    pub to_client: mpsc::UnboundedSender<String>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerSocket {
    /// Next frame from the client, split into its API path and envelope.
    pub async fn next_request(&mut self) -> (String, Value) {
        let frame = timeout(TEST_TIMEOUT, self.from_client.recv())
            .await
            .expect("Timed out waiting for a client frame")
            .expect("Client closed the socket");
        split_frame(&frame)
    }

    pub fn reply(&self, frame: Value) {
        self.to_client
            .send(frame.to_string())
            .expect("Client stopped reading");
    }
}

/// Split `/api/2/...?json=[envelope]` into path and envelope.
pub fn split_frame(frame: &str) -> (String, Value) {
    let (path, json) = frame.split_once("?json=").expect("Frame without ?json=");
    let mut batch: Vec<Value> = serde_json::from_str(json).expect("Envelope is not JSON");
    assert_eq!(batch.len(), 1, "Expected exactly one envelope per frame");
    (path.to_string(), batch.remove(0))
}

#[derive(Default)]
pub struct MemoryTransport {
    opens: AtomicUsize,
    refuse: AtomicBool,
    accepted: Mutex<Option<mpsc::UnboundedSender<ServerSocket>>>,
}

impl MemoryTransport {
    /// Transport plus the stream of server sockets it accepts.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSocket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            accepted: Mutex::new(Some(tx)),
            ..Default::default()
        });
        (transport, rx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, _url: &Url) -> Result<TransportLink, RconError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(RconError::Connection("Connection refused".to_string()));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();

        let accepted = self.accepted.lock().unwrap();
        if let Some(accepted) = accepted.as_ref() {
            let _ = accepted.send(ServerSocket {
                to_client,
                from_client,
            });
        }

        Ok(TransportLink {
            outbound: to_server,
            inbound: from_server,
        })
    }
}

pub async fn next_socket(sockets: &mut mpsc::UnboundedReceiver<ServerSocket>) -> ServerSocket {
    timeout(TEST_TIMEOUT, sockets.recv())
        .await
        .expect("Timed out waiting for the client to connect")
        .expect("Transport dropped")
}

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("localhost", 20059, Credentials::new("u", "p", "s"));
    config.connect_on_start = false;
    config
}

/// Client over `transport` whose pushes are collected in the returned vector.
pub fn recording_client(
    config: ClientConfig,
    transport: Arc<MemoryTransport>,
) -> (RconClient, Arc<Mutex<Vec<Value>>>) {
    let pushes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&pushes);
    let client = RconClient::with_transport(config, transport, move |payload| {
        sink.lock().unwrap().push(payload);
    })
    .expect("Valid test config");
    (client, pushes)
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}
