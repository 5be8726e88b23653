//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use queue_transport::net::{ConnectionTracker, FailurePolicy, InboundItem, Receiver, Subscription};
use queue_transport::protocol::length_prefixed::{encode_frame, DEFAULT_MAX_FRAME_BYTES};
use queue_transport::protocol::{LengthPrefixedProtocol, OutgoingMessage};

pub const WAIT: Duration = Duration::from_secs(5);

/// A started receiver on an ephemeral loopback port.
pub struct TestReceiver {
    pub receiver: Receiver,
    pub tracker: ConnectionTracker,
    pub addr: SocketAddr,
}

pub fn start_receiver(policy: FailurePolicy) -> TestReceiver {
    start_receiver_with(|receiver| receiver.with_failure_policy(policy))
}

/// Start a loopback receiver after applying `configure` to it.
pub fn start_receiver_with(configure: impl FnOnce(Receiver) -> Receiver) -> TestReceiver {
    let tracker = ConnectionTracker::new();
    let receiver = Receiver::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(LengthPrefixedProtocol::default()),
    )
    .with_tracker(tracker.clone());
    let receiver = configure(receiver);
    receiver.start_receiving().unwrap();
    let addr = receiver.local_addr().unwrap();
    TestReceiver {
        receiver,
        tracker,
        addr,
    }
}

/// Connect, write one frame per message, and close.
pub async fn send_frames(addr: SocketAddr, messages: &[OutgoingMessage]) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    for msg in messages {
        let frame = encode_frame(&msg.to_message(), DEFAULT_MAX_FRAME_BYTES).unwrap();
        stream.write_all(&frame).await.unwrap();
    }
    stream.shutdown().await.unwrap();
}

/// Connect and write raw bytes, then close.
pub async fn send_raw(addr: SocketAddr, bytes: &[u8]) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    stream.shutdown().await.unwrap();
}

/// Next item from a subscription, failing the test instead of hanging.
pub async fn next_item(sub: &mut Subscription) -> Option<InboundItem> {
    tokio::time::timeout(WAIT, sub.next())
        .await
        .expect("timed out waiting for inbound item")
}

/// Retry binding `addr` until the port is free again.
pub async fn wait_for_port_release(addr: SocketAddr) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if std::net::TcpListener::bind(addr).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Poll `condition` until it holds or the wait runs out.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub fn message(data: &str) -> OutgoingMessage {
    OutgoingMessage::new("test-queue", data.as_bytes().to_vec())
}
