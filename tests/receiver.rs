//! Receiver behaviour against real loopback connections.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use queue_transport::net::{BoxedStream, Destination, FailurePolicy};
use queue_transport::protocol::Message;
use queue_transport::security::StreamSecurity;
use queue_transport::{SecurityError, TransportError};

mod common;

use common::{
    eventually, message, next_item, send_frames, send_raw, start_receiver, start_receiver_with,
    wait_for_port_release, WAIT,
};

/// Rejects the first handshake and passes every later stream through.
#[derive(Debug, Default)]
struct RejectFirstHandshake {
    calls: AtomicUsize,
}

#[async_trait]
impl StreamSecurity for RejectFirstHandshake {
    async fn apply<'a>(
        &self,
        _destination: &Destination,
        stream: BoxedStream<'a>,
    ) -> Result<BoxedStream<'a>, SecurityError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(SecurityError::Handshake(std::io::Error::other("bad handshake")));
        }
        Ok(stream)
    }
}

/// Never finishes a handshake.
#[derive(Debug)]
struct StalledHandshake;

#[async_trait]
impl StreamSecurity for StalledHandshake {
    async fn apply<'a>(
        &self,
        _destination: &Destination,
        _stream: BoxedStream<'a>,
    ) -> Result<BoxedStream<'a>, SecurityError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn start_receiving_twice_binds_once() {
    let test = start_receiver(FailurePolicy::TerminateAll);
    let first = test.receiver.start_receiving().unwrap();
    let second = test.receiver.start_receiving().unwrap();

    assert!(first.same_as(&second));
    assert_eq!(test.receiver.local_addr(), Some(test.addr));
    // The port is held by the single listener.
    assert!(std::net::TcpListener::bind(test.addr).is_err());
}

#[tokio::test]
async fn accept_loop_waits_for_the_first_subscriber() {
    let test = start_receiver(FailurePolicy::TerminateAll);
    let messages = test.receiver.start_receiving().unwrap();

    let early = message("queued before subscribe");
    send_frames(test.addr, &[early.clone()]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!messages.is_started());
    assert_eq!(test.tracker.active_count(), 0);

    let mut sub = messages.subscribe();
    let received = next_item(&mut sub).await.unwrap().unwrap();
    assert_eq!(received.id, early.id);
    assert!(messages.is_started());
}

#[tokio::test]
async fn every_subscriber_sees_every_connection() {
    let test = start_receiver(FailurePolicy::TerminateAll);
    let messages = test.receiver.start_receiving().unwrap();
    let mut a = messages.subscribe();
    let mut b = messages.clone().subscribe();

    let first = [message("1a"), message("1b")];
    let second = [message("2a")];
    send_frames(test.addr, &first).await;
    send_frames(test.addr, &second).await;

    let expected: HashSet<_> = first.iter().chain(second.iter()).map(|m| m.id).collect();
    for sub in [&mut a, &mut b] {
        let mut seen: Vec<Message> = Vec::new();
        for _ in 0..3 {
            seen.push(next_item(sub).await.unwrap().unwrap());
        }
        let ids: HashSet<_> = seen.iter().map(|m| m.id).collect();
        assert_eq!(ids, expected);

        // Order within one connection is preserved.
        let pos = |id| seen.iter().position(|m| m.id == id).unwrap();
        assert!(pos(first[0].id) < pos(first[1].id));
    }
}

#[tokio::test]
async fn connection_is_released_after_its_stream_ends() {
    let test = start_receiver(FailurePolicy::TerminateAll);
    let messages = test.receiver.start_receiving().unwrap();
    let mut sub = messages.subscribe();

    send_frames(test.addr, &[message("only")]).await;
    next_item(&mut sub).await.unwrap().unwrap();

    assert!(test.tracker.wait_for_idle(WAIT).await);
}

#[tokio::test]
async fn dispose_abandons_pending_accept_and_frees_the_port() {
    let test = start_receiver(FailurePolicy::TerminateAll);
    let messages = test.receiver.start_receiving().unwrap();
    let mut sub = messages.subscribe();
    tokio::time::sleep(Duration::from_millis(50)).await;

    test.receiver.dispose();
    test.receiver.dispose();

    assert!(next_item(&mut sub).await.is_none());
    assert!(wait_for_port_release(test.addr).await);
    assert!(matches!(
        test.receiver.start_receiving(),
        Err(TransportError::Stopped)
    ));
}

#[tokio::test]
async fn dispose_before_subscribing_frees_the_port() {
    let test = start_receiver(FailurePolicy::TerminateAll);
    test.receiver.dispose();
    assert!(wait_for_port_release(test.addr).await);
}

#[tokio::test]
async fn bad_connection_ends_the_sequence_for_everyone() {
    let test = start_receiver(FailurePolicy::TerminateAll);
    let messages = test.receiver.start_receiving().unwrap();
    let mut a = messages.subscribe();
    let mut b = messages.subscribe();

    let mut garbage = 5u32.to_be_bytes().to_vec();
    garbage.extend_from_slice(b"xxxxx");
    send_raw(test.addr, &garbage).await;

    for sub in [&mut a, &mut b] {
        let err = next_item(sub).await.unwrap().unwrap_err();
        assert!(matches!(*err, TransportError::Protocol(_)));
        assert!(next_item(sub).await.is_none());
    }

    let mut late = messages.subscribe();
    assert!(next_item(&mut late).await.unwrap().is_err());

    // The accept loop stopped with the sequence.
    assert!(wait_for_port_release(test.addr).await);
}

#[tokio::test]
async fn isolated_failures_keep_the_sequence_alive() {
    let test = start_receiver(FailurePolicy::IsolateConnection);
    let messages = test.receiver.start_receiving().unwrap();
    let mut sub = messages.subscribe();

    send_raw(test.addr, &[0, 0, 0]).await;
    let good = message("after the bad one");
    send_frames(test.addr, &[good.clone()]).await;

    let received = next_item(&mut sub).await.unwrap().unwrap();
    assert_eq!(received.id, good.id);
    assert!(test.tracker.wait_for_idle(WAIT).await);
}

#[tokio::test]
async fn resubscribing_after_the_last_subscriber_leaves_resumes_delivery() {
    let test = start_receiver(FailurePolicy::TerminateAll);
    let messages = test.receiver.start_receiving().unwrap();

    drop(messages.subscribe());
    assert_eq!(messages.subscriber_count(), 0);

    let mut again = messages.subscribe();
    let sent = message("after resubscribe");
    send_frames(test.addr, &[sent.clone()]).await;

    let received = next_item(&mut again).await.unwrap().unwrap();
    assert_eq!(received.id, sent.id);
}

#[tokio::test]
async fn failed_handshake_closes_only_that_connection() {
    let security = Arc::new(RejectFirstHandshake::default());
    let test = start_receiver_with(|receiver| receiver.with_security(security.clone()));
    let messages = test.receiver.start_receiving().unwrap();
    let mut sub = messages.subscribe();

    send_frames(test.addr, &[message("rejected")]).await;
    assert!(eventually(|| security.calls.load(Ordering::SeqCst) == 1).await);
    assert!(test.tracker.wait_for_idle(WAIT).await);

    let good = message("after the bad handshake");
    send_frames(test.addr, &[good.clone()]).await;

    let received = next_item(&mut sub).await.unwrap().unwrap();
    assert_eq!(received.id, good.id);
    assert!(!test.receiver.is_disposed());
}

#[tokio::test]
async fn silent_peer_is_dropped_after_the_receive_timeout() {
    let test = start_receiver_with(|receiver| receiver.with_timeout(Duration::from_millis(200)));
    let messages = test.receiver.start_receiving().unwrap();
    let mut sub = messages.subscribe();

    let mut silent = TcpStream::connect(test.addr).await.unwrap();
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(WAIT, silent.read(&mut buf))
        .await
        .expect("silent peer was never dropped");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(test.tracker.wait_for_idle(WAIT).await);

    // A timeout is not a failure of the shared sequence.
    let good = message("after the silent peer");
    send_frames(test.addr, &[good.clone()]).await;
    let received = next_item(&mut sub).await.unwrap().unwrap();
    assert_eq!(received.id, good.id);
}

#[tokio::test]
async fn stalled_handshake_is_dropped_after_the_receive_timeout() {
    let test = start_receiver_with(|receiver| {
        receiver
            .with_security(Arc::new(StalledHandshake))
            .with_timeout(Duration::from_millis(200))
    });
    let messages = test.receiver.start_receiving().unwrap();
    let _sub = messages.subscribe();

    let _peer = TcpStream::connect(test.addr).await.unwrap();
    assert!(eventually(|| test.tracker.active_count() == 1).await);
    assert!(test.tracker.wait_for_idle(WAIT).await);
    assert!(!test.receiver.is_disposed());
}
