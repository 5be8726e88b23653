//! Fan-out of decoded messages to every subscriber of a receiver.
//!
//! # Responsibilities
//! - Start the producer (the accept loop) on the first subscription, once
//! - Deliver each published message to every current subscriber
//! - Deliver a terminal failure to everyone, including late subscribers
//!
//! The subscriber map is guarded by a plain mutex. It is held only to
//! insert, remove or clone senders, never across an await.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::error::{SharedError, TransportError};
use crate::protocol::Message;

/// Item yielded by a [`Subscription`].
pub type InboundItem = Result<Message, SharedError>;

/// Starts the producer. Runs at most once per hub.
pub(crate) type Starter = Box<dyn FnOnce(Arc<Hub>) + Send>;

#[derive(Debug, Clone)]
enum Outcome {
    /// The receiver was stopped.
    Completed,
    /// Accepting or decoding failed; every subscriber got this error.
    Failed(SharedError),
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<u64, mpsc::UnboundedSender<InboundItem>>,
    next_id: u64,
    starter: Option<Starter>,
    started: bool,
    outcome: Option<Outcome>,
}

/// Broadcast point shared by the accept loop, decode tasks and subscribers.
pub(crate) struct Hub {
    state: Mutex<HubState>,
}

impl Hub {
    pub(crate) fn new(starter: Starter) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState {
                starter: Some(starter),
                ..HubState::default()
            }),
        })
    }

    fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.state.lock().expect("hub mutex poisoned");
        let state = &mut *guard;
        let id = state.next_id;
        state.next_id += 1;

        match &state.outcome {
            Some(Outcome::Failed(err)) => {
                let _ = tx.send(Err(Arc::clone(err)));
            }
            Some(Outcome::Completed) => {}
            None => {
                state.subscribers.insert(id, tx);
            }
        }

        let starter = if state.outcome.is_none() {
            state.starter.take()
        } else {
            None
        };
        if starter.is_some() {
            state.started = true;
        }
        let subscriber_count = state.subscribers.len();
        drop(guard);

        tracing::trace!(subscriber_id = id, subscriber_count, "Subscriber attached");
        if let Some(start) = starter {
            start(Arc::clone(self));
        }

        Subscription {
            id,
            rx,
            hub: Arc::clone(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock().expect("hub mutex poisoned");
        state.subscribers.remove(&id);
    }

    /// Deliver a message to every current subscriber.
    pub(crate) fn publish(&self, message: Message) {
        let mut state = self.state.lock().expect("hub mutex poisoned");
        if state.outcome.is_some() {
            return;
        }
        state
            .subscribers
            .retain(|_, tx| tx.send(Ok(message.clone())).is_ok());
    }

    /// End the sequence with an error. Later calls are ignored.
    pub(crate) fn fail(&self, error: TransportError) {
        let mut state = self.state.lock().expect("hub mutex poisoned");
        if state.outcome.is_some() {
            return;
        }
        let error = Arc::new(error);
        for (_, tx) in state.subscribers.drain() {
            let _ = tx.send(Err(Arc::clone(&error)));
        }
        state.outcome = Some(Outcome::Failed(error));
        state.starter = None;
    }

    /// End the sequence cleanly, dropping a producer that never started.
    pub(crate) fn close(&self) {
        let starter = {
            let mut state = self.state.lock().expect("hub mutex poisoned");
            if state.outcome.is_none() {
                state.outcome = Some(Outcome::Completed);
            }
            state.subscribers.clear();
            state.starter.take()
        };
        // Dropped outside the lock: it owns the listening socket.
        drop(starter);
    }

    fn subscriber_count(&self) -> usize {
        self.state.lock().expect("hub mutex poisoned").subscribers.len()
    }

    fn is_started(&self) -> bool {
        self.state.lock().expect("hub mutex poisoned").started
    }
}

/// Shared handle to a receiver's inbound message sequence.
///
/// Clones refer to the same sequence. The receiver's accept loop starts when
/// the first [`Subscription`] is taken and runs once no matter how many
/// subscribers attach.
#[derive(Clone)]
pub struct InboundMessages {
    hub: Arc<Hub>,
}

impl InboundMessages {
    pub(crate) fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Attach a consumer. It sees every message published from now on.
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// True once the accept loop has been started by a subscription.
    pub fn is_started(&self) -> bool {
        self.hub.is_started()
    }

    /// True if both handles refer to the same sequence.
    pub fn same_as(&self, other: &InboundMessages) -> bool {
        Arc::ptr_eq(&self.hub, &other.hub)
    }

    pub(crate) fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }
}

impl std::fmt::Debug for InboundMessages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessages")
            .field("subscribers", &self.subscriber_count())
            .field("started", &self.is_started())
            .finish()
    }
}

/// One consumer's view of the inbound sequence.
///
/// Ends after the receiver stops, or right after yielding a terminal error.
/// Dropping it detaches the consumer.
///
/// Messages queue per subscription without a bound, so a slow consumer never
/// holds up the accept loop or other subscribers. A subscription that is
/// kept must be polled; one that is no longer read should be dropped.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<InboundItem>,
    hub: Arc<Hub>,
}

impl Stream for Subscription {
    type Item = InboundItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub").finish_non_exhaustive()
    }
}
