//! Metric bus: fan-out hand-off from the training thread to stream subscribers
//!
//! Every subscriber owns a bounded queue and sees every event published after
//! it attached, in publish order. Events of the current run are also kept in
//! a bounded replay history, so a client that subscribes after `Start` still
//! receives the run from its first event.
//!
//! When a subscriber's queue is full the producer blocks instead of dropping
//! the event. Detached subscribers (receiver dropped) are pruned on the next
//! publish or subscribe.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use trainwatch_common::MetricEvent;
use trainwatch_common::defaults::{
    DEFAULT_HISTORY_CAPACITY, DEFAULT_MAX_SUBSCRIBERS, DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
};

/// Events are immutable once published and shared between subscribers.
pub type SharedEvent = Arc<MetricEvent>;

/// Bus errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus was closed; no further publishes or subscriptions
    #[error("metric bus is closed")]
    Closed,

    /// Subscriber limit reached
    #[error("subscriber limit of {0} reached")]
    TooManySubscribers(usize),
}

/// Sizing of the bus
#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    /// Per-subscriber queue depth before the producer blocks
    pub queue_capacity: usize,
    /// Events of the current run kept for late subscribers (0 disables replay)
    pub history_capacity: usize,
    /// Maximum number of attached subscribers
    pub max_subscribers: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
        }
    }
}

/// Result of [`Subscription::try_consume`]
#[derive(Debug, Clone, PartialEq)]
pub enum Consumed {
    /// A published event
    Event(SharedEvent),
    /// Nothing arrived within the timeout
    TimedOut,
    /// The bus was closed and everything queued has been drained
    Closed,
}

struct SubscriberSlot {
    id: u64,
    sender: mpsc::Sender<SharedEvent>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Vec<SubscriberSlot>,
    history: VecDeque<SharedEvent>,
    evicted: u64,
    next_id: u64,
    closed: bool,
}

impl BusInner {
    fn prune(&mut self) {
        self.subscribers.retain(|s| !s.sender.is_closed());
    }
}

/// Thread-safe metric hand-off between the training collaborator and the
/// streaming endpoints.
pub struct MetricBus {
    config: BusConfig,
    inner: Mutex<BusInner>,
    /// Serializes publishers so every subscriber sees the same order.
    publish_order: tokio::sync::Mutex<()>,
}

impl MetricBus {
    /// Create a bus with the given sizing
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BusInner::default()),
            publish_order: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the history and snapshot the current subscribers.
    fn record(
        &self,
        event: &SharedEvent,
    ) -> Result<Vec<(u64, mpsc::Sender<SharedEvent>)>, BusError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(BusError::Closed);
        }

        if self.config.history_capacity > 0 {
            while inner.history.len() >= self.config.history_capacity {
                inner.history.pop_front();
                inner.evicted += 1;
            }
            inner.history.push_back(Arc::clone(event));
        }

        inner.prune();
        Ok(inner
            .subscribers
            .iter()
            .map(|s| (s.id, s.sender.clone()))
            .collect())
    }

    /// Publish from a blocking (non-async) thread, such as the training
    /// collaborator's.
    ///
    /// Blocks while any attached subscriber's queue is full.
    ///
    /// # Panics
    /// Panics if called from within an async execution context; use
    /// [`MetricBus::publish_async`] there.
    pub fn publish(&self, event: MetricEvent) -> Result<(), BusError> {
        let event = Arc::new(event);
        let _order = self.publish_order.blocking_lock();
        for (id, sender) in self.record(&event)? {
            if sender.blocking_send(Arc::clone(&event)).is_err() {
                trace!(subscriber = id, "Subscriber detached during publish");
            }
        }
        Ok(())
    }

    /// Publish from async code. Waits while any subscriber's queue is full.
    pub async fn publish_async(&self, event: MetricEvent) -> Result<(), BusError> {
        let event = Arc::new(event);
        let _order = self.publish_order.lock().await;
        for (id, sender) in self.record(&event)? {
            if sender.send(Arc::clone(&event)).await.is_err() {
                trace!(subscriber = id, "Subscriber detached during publish");
            }
        }
        Ok(())
    }

    /// Attach a new subscriber.
    ///
    /// The subscription replays the current run's retained history before
    /// any live event.
    pub fn subscribe(&self) -> Result<Subscription, BusError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(BusError::Closed);
        }

        inner.prune();
        if inner.subscribers.len() >= self.config.max_subscribers {
            return Err(BusError::TooManySubscribers(self.config.max_subscribers));
        }

        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        let id = inner.next_id;
        inner.next_id += 1;
        let backlog = inner.history.clone();
        inner.subscribers.push(SubscriberSlot { id, sender });

        debug!(
            subscriber = id,
            backlog = backlog.len(),
            evicted = inner.evicted,
            attached = inner.subscribers.len(),
            "Subscriber attached to metric bus"
        );

        Ok(Subscription {
            id,
            backlog,
            receiver,
        })
    }

    /// Drop the replay history; called when a new run starts.
    pub fn begin_run(&self) {
        self.clear_history();
    }

    /// Drop the replay history of a finished run, so an idle subscriber
    /// starts from the next run's first event.
    pub fn end_run(&self) {
        self.clear_history();
    }

    fn clear_history(&self) {
        let mut inner = self.lock();
        inner.history.clear();
        inner.evicted = 0;
    }

    /// Close the bus. Subscribers drain what is queued, then see `Closed`.
    pub fn close(&self) {
        let mut inner = self.lock();
        if !inner.closed {
            inner.closed = true;
            inner.subscribers.clear();
            debug!("Metric bus closed");
        }
    }

    /// Whether [`MetricBus::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.prune();
        inner.subscribers.len()
    }

    /// Number of events currently retained for replay
    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }
}

impl Default for MetricBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

/// One subscriber's view of the bus. Dropping it detaches the subscriber.
pub struct Subscription {
    id: u64,
    backlog: VecDeque<SharedEvent>,
    receiver: mpsc::Receiver<SharedEvent>,
}

impl Subscription {
    /// Identifier of this subscriber, unique per bus
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// A timeout is a normal result, not an error: callers use it to
    /// re-check whether they should keep waiting.
    pub async fn try_consume(&mut self, timeout: Duration) -> Consumed {
        if let Some(event) = self.backlog.pop_front() {
            return Consumed::Event(event);
        }

        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(event)) => Consumed::Event(event),
            Ok(None) => Consumed::Closed,
            Err(_) => Consumed::TimedOut,
        }
    }
}
