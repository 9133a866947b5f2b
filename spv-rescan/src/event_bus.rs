//! Broadcast bus for lifecycle notifications.
//!
//! The supervisor publishes every phase change and status report on an
//! [`EventBus`]. Any number of observers may subscribe; late subscribers do not
//! see past events.

use thiserror::Error;
use tokio::sync::broadcast;

/// Default number of events buffered for slow subscribers.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Event-related errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Subscriber lagged behind by {0} events")]
    Lagged(u64),

    #[error("Event bus closed")]
    Closed,
}

type Result<T> = std::result::Result<T, Error>;

/// Event bus backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus<T: Clone> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
        }
    }

    pub fn subscribe(&self) -> EventReceiver<T> {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish one event. Having no subscribers is not an error.
    pub fn emit(&self, event: T) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[derive(Debug)]
pub struct EventReceiver<T: Clone> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> EventReceiver<T> {
    pub async fn recv(&mut self) -> Result<T> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(n) => Error::Lagged(n),
            broadcast::error::RecvError::Closed => Error::Closed,
        })
    }

    /// Take an already delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!("Event subscriber skipped {} events", n);
                }
                Err(_) => return None,
            }
        }
    }

    /// Every event delivered so far.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
