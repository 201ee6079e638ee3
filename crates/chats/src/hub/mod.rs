//! Multi-queue event hub.
//!
//! A [`MultiQueue`] fans one upstream source out to many independently
//! subscribed queues. Every published event is appended to a bounded
//! in-memory log and handed to each registered subscriber before
//! [`MultiQueue::publish`] returns.
//!
//! # Guarantees
//!
//! - **Forward delivery**: a subscriber only sees events published after it
//!   subscribed ([`MultiQueue::past_and_new_events`] is the one exception and
//!   replays the retained log first)
//! - **Exactly once, in publish order**: every subscriber sees each event once,
//!   and subscribers of the same queue observe the same order
//! - **Independent unsubscribe**: dropping a [`Subscription`] stops delivery to
//!   it and to nobody else
//!
//! Transforms passed to [`MultiQueue::map`] run inside `publish` while the
//! upstream hub is locked; they must not publish back into that hub.

mod subscription;

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::types::{ChatError, ChatResult};

pub use subscription::Subscription;

/// Default number of events retained for replaying subscriptions.
pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

type Forwarder<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SinkKind {
    Queue(String),
    All,
    Replay,
    Derived,
}

enum SinkTarget<T> {
    Channel(mpsc::UnboundedSender<T>),
    Forward(Forwarder<T>),
}

struct Sink<T> {
    kind: SinkKind,
    target: SinkTarget<T>,
}

impl<T: Clone> Sink<T> {
    /// Hand the event over; `false` means the receiving side is gone.
    fn deliver(&self, event: &T) -> bool {
        match &self.target {
            SinkTarget::Channel(sender) => sender.send(event.clone()).is_ok(),
            SinkTarget::Forward(forward) => forward(event),
        }
    }
}

struct HubState<T> {
    log: VecDeque<T>,
    capacity: usize,
    queues: BTreeSet<String>,
    sinks: Vec<Sink<T>>,
    error_sinks: Vec<mpsc::UnboundedSender<ChatError>>,
    disposed: bool,
}

impl<T> HubState<T> {
    fn new(capacity: usize) -> Self {
        Self {
            log: VecDeque::new(),
            capacity,
            queues: BTreeSet::new(),
            sinks: Vec::new(),
            error_sinks: Vec::new(),
            disposed: false,
        }
    }
}

/// Fan-out hub keyed by queue name over a single ordered log.
///
/// Cloning a `MultiQueue` yields another handle to the same hub.
pub struct MultiQueue<T> {
    inner: Arc<Mutex<HubState<T>>>,
}

impl<T> Clone for MultiQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> MultiQueue<T>
where
    T: Clone + Send + 'static,
{
    /// Create a new hub with the default log capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// Create a new hub retaining at most `capacity` events for replay.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubState::new(capacity))),
        }
    }

    /// Append the event to the log and deliver it to every current subscriber.
    ///
    /// Subscribers whose receiving side has gone away are pruned. Publishing
    /// to a disposed hub is a no-op.
    pub fn publish(&self, event: T) {
        let mut state = lock(&self.inner);
        if state.disposed {
            return;
        }

        if state.capacity > 0 {
            if state.log.len() == state.capacity {
                state.log.pop_front();
            }
            state.log.push_back(event.clone());
        }

        let before = state.sinks.len();
        state.sinks.retain(|sink| sink.deliver(&event));
        let pruned = before - state.sinks.len();
        if pruned > 0 {
            trace!(pruned, "dropped closed hub subscribers");
        }
    }

    /// Subscribe to a named queue, creating it at the current log position on
    /// first use. Later calls with the same name attach to the same queue.
    pub fn subscribe_to_queue(&self, name: &str) -> Subscription<T> {
        let mut state = lock(&self.inner);
        if state.queues.insert(name.to_string()) {
            debug!(queue = name, "created hub queue");
        }
        Self::register(&mut state, SinkKind::Queue(name.to_string()))
    }

    /// Every event published from now on, once each, in log order.
    pub fn all_events(&self) -> Subscription<T> {
        let mut state = lock(&self.inner);
        Self::register(&mut state, SinkKind::All)
    }

    /// Replay the events retained since the last reset, then continue with
    /// live events. Replay and registration happen atomically so no event is
    /// missed or duplicated.
    pub fn past_and_new_events(&self) -> Subscription<T> {
        let mut state = lock(&self.inner);
        let (sender, receiver) = mpsc::unbounded_channel();
        for event in &state.log {
            // The receiver is still in scope, this cannot fail.
            let _ = sender.send(event.clone());
        }
        if !state.disposed {
            state.sinks.push(Sink {
                kind: SinkKind::Replay,
                target: SinkTarget::Channel(sender),
            });
        }
        Subscription::new(Some("replay".to_string()), receiver)
    }

    /// Derive a hub whose events are `transform` applied to each upstream
    /// event.
    ///
    /// A failing transform publishes the error on the derived hub's error
    /// channel; the next upstream event is processed normally. Dropping or
    /// disposing the derived hub detaches it without touching the upstream.
    pub fn map<U, F>(&self, transform: F) -> MultiQueue<U>
    where
        U: Clone + Send + 'static,
        F: Fn(&T) -> ChatResult<U> + Send + Sync + 'static,
    {
        let mut state = lock(&self.inner);
        let derived = MultiQueue::<U>::with_capacity(state.capacity);
        if state.disposed {
            derived.dispose();
            return derived;
        }

        let target = Arc::downgrade(&derived.inner);
        let forward = move |event: &T| -> bool {
            let Some(inner) = target.upgrade() else {
                return false;
            };
            let hub = MultiQueue { inner };
            if hub.is_disposed() {
                return false;
            }
            match transform(event) {
                Ok(mapped) => hub.publish(mapped),
                Err(error) => hub.publish_error(error),
            }
            true
        };

        state.sinks.push(Sink {
            kind: SinkKind::Derived,
            target: SinkTarget::Forward(Arc::new(forward)),
        });
        derived
    }

    /// Stream of errors reported on this hub.
    pub fn errors(&self) -> Subscription<ChatError> {
        let mut state = lock(&self.inner);
        let (sender, receiver) = mpsc::unbounded_channel();
        if !state.disposed {
            state.error_sinks.push(sender);
        }
        Subscription::new(Some("errors".to_string()), receiver)
    }

    /// Report an error to every error subscriber without touching the log.
    pub fn publish_error(&self, error: ChatError) {
        let mut state = lock(&self.inner);
        state
            .error_sinks
            .retain(|sender| sender.send(error.clone()).is_ok());
    }

    /// Move the reset point: replaying subscriptions created afterwards start
    /// from here.
    pub fn reset(&self) {
        lock(&self.inner).log.clear();
    }

    /// Close the hub. Existing subscriptions end once drained and further
    /// publishes are ignored.
    pub fn dispose(&self) {
        let mut state = lock(&self.inner);
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.sinks.clear();
        state.error_sinks.clear();
        state.log.clear();
        debug!(queues = state.queues.len(), "disposed hub");
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.inner).disposed
    }

    /// Names of the queues created so far.
    pub fn queue_names(&self) -> Vec<String> {
        lock(&self.inner).queues.iter().cloned().collect()
    }

    /// Number of live subscribers across all queues, including derived hubs.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).sinks.len()
    }

    /// Number of subscribers attached to the named queue.
    pub fn queue_subscriber_count(&self, name: &str) -> usize {
        lock(&self.inner)
            .sinks
            .iter()
            .filter(|sink| matches!(&sink.kind, SinkKind::Queue(queue) if queue == name))
            .count()
    }

    /// Number of events retained for replay.
    pub fn retained(&self) -> usize {
        lock(&self.inner).log.len()
    }

    fn register(state: &mut HubState<T>, kind: SinkKind) -> Subscription<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let name = match &kind {
            SinkKind::Queue(name) => Some(name.clone()),
            _ => None,
        };
        if !state.disposed {
            state.sinks.push(Sink {
                kind,
                target: SinkTarget::Channel(sender),
            });
        }
        Subscription::new(name, receiver)
    }
}

impl<T> Default for MultiQueue<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MultiQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner);
        f.debug_struct("MultiQueue")
            .field("queues", &state.queues)
            .field("subscribers", &state.sinks.len())
            .field("retained", &state.log.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}
