//! Stream security applied on both sides of a real connection.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use queue_transport::net::{BoxedStream, Destination, FailurePolicy, NeverLocal, OutgoingBatch};
use queue_transport::protocol::{LengthPrefixedProtocol, SendingProtocol};
use queue_transport::security::{StreamSecurity, TlsClientSecurity, TlsServerSecurity};
use queue_transport::SecurityError;

mod common;

use common::{message, next_item, send_frames, start_receiver_with, WAIT};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Passes streams through and remembers where each one was applied.
#[derive(Debug, Default)]
struct Recording {
    applied: Mutex<Vec<Destination>>,
}

#[async_trait]
impl StreamSecurity for Recording {
    async fn apply<'a>(
        &self,
        destination: &Destination,
        stream: BoxedStream<'a>,
    ) -> Result<BoxedStream<'a>, SecurityError> {
        self.applied.lock().unwrap().push(destination.clone());
        Ok(stream)
    }
}

#[tokio::test]
async fn receiver_applies_its_transform_to_every_connection() {
    let security = Arc::new(Recording::default());
    let test = start_receiver_with(|receiver| receiver.with_security(security.clone()));
    let messages = test.receiver.start_receiving().unwrap();
    let mut sub = messages.subscribe();

    let first = message("one");
    let second = message("two");
    send_frames(test.addr, &[first.clone()]).await;
    send_frames(test.addr, &[second.clone()]).await;

    let mut ids = vec![
        next_item(&mut sub).await.unwrap().unwrap().id,
        next_item(&mut sub).await.unwrap().unwrap().id,
    ];
    ids.sort_by_key(|id| id.to_string());
    let mut expected = vec![first.id, second.id];
    expected.sort_by_key(|id| id.to_string());
    assert_eq!(ids, expected);

    let applied = security.applied.lock().unwrap().clone();
    assert_eq!(applied.len(), 2);
    for destination in applied {
        assert_eq!(destination.port(), test.addr.port());
        assert_eq!(destination.host(), "127.0.0.1");
    }
}

#[tokio::test]
async fn batch_delivers_over_tls_to_a_tls_receiver() {
    let server = TlsServerSecurity::from_pem_files(&fixture("server.pem"), &fixture("server.key"))
        .unwrap();
    let test = start_receiver_with(|receiver| {
        receiver
            .with_security(Arc::new(server))
            .with_failure_policy(FailurePolicy::TerminateAll)
    });
    let messages = test.receiver.start_receiving().unwrap();
    let mut sub = messages.subscribe();

    // A plain peer fails the handshake without ending the sequence.
    send_frames(test.addr, &[message("plaintext")]).await;

    let client = TlsClientSecurity::from_ca_file(&fixture("ca.pem"))
        .unwrap()
        .with_server_name("localhost");
    let mut batch = OutgoingBatch::new(
        Destination::new("lq.tcp", "127.0.0.1", test.addr.port()),
        vec![message("A"), message("B")],
        Arc::new(client),
    )
    .with_local_host(Arc::new(NeverLocal))
    .with_connect_timeout(WAIT);

    batch.connect().await.unwrap();
    let outgoing = batch.messages().to_vec();
    {
        let mut stream = batch.stream().await.unwrap();
        LengthPrefixedProtocol::default()
            .send(&mut *stream, &outgoing)
            .await
            .unwrap();
        // close_notify, so the receiver sees a clean end of stream.
        stream.shutdown().await.unwrap();
    }
    batch.dispose();

    let first = next_item(&mut sub).await.unwrap().unwrap();
    let second = next_item(&mut sub).await.unwrap().unwrap();
    assert_eq!(first.data, b"A".to_vec());
    assert_eq!(second.data, b"B".to_vec());

    assert!(test.tracker.wait_for_idle(WAIT).await);
    assert!(!test.receiver.is_disposed());
}
