/*!
 * Event bus for tvlink.
 *
 * Sessions publish state changes and device notifications here; any number
 * of application subscribers receive them through typed broadcast channels.
 */
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::trace;

use crate::error::{Error, Result};

/// Maximum number of events that can be buffered in a channel
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

type EventSender<T> = broadcast::Sender<T>;

/// Receiver half handed out by [`EventBus::subscribe`]
pub type EventReceiver<T> = broadcast::Receiver<T>;

/// Event bus keyed by event type
#[derive(Debug)]
pub struct EventBus {
    channels: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    channel_capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            channel_capacity: capacity.max(1),
        }
    }

    fn sender<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventSender<T>> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::event("Failed to lock channels"))?;

        let entry = channels.entry(TypeId::of::<T>()).or_insert_with(|| {
            let (sender, _) = broadcast::channel::<T>(self.channel_capacity);
            Box::new(sender) as Box<dyn Any + Send + Sync>
        });

        entry
            .downcast_ref::<EventSender<T>>()
            .cloned()
            .ok_or_else(|| Error::event("Failed to downcast sender"))
    }

    /// Publish an event, returning how many subscribers received it
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish<T: Clone + Debug + Send + Sync + 'static>(&self, event: T) -> Result<usize> {
        let sender = self.sender::<T>()?;
        if sender.receiver_count() == 0 {
            trace!("No receivers for {:?}", event);
            return Ok(0);
        }

        // A send error means every receiver was dropped after the count check.
        Ok(sender.send(event).unwrap_or(0))
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventReceiver<T>> {
        Ok(self.sender::<T>()?.subscribe())
    }

    /// Number of live subscribers for an event type
    pub fn receiver_count<T: Clone + Debug + Send + Sync + 'static>(&self) -> usize {
        self.sender::<T>().map(|s| s.receiver_count()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared event bus that can be cloned
#[derive(Debug, Clone, Default)]
pub struct SharedEventBus(Arc<EventBus>);

impl SharedEventBus {
    /// Create a new shared event bus
    pub fn new() -> Self {
        Self(Arc::new(EventBus::new()))
    }

    /// Create a new shared event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(EventBus::with_capacity(capacity)))
    }

    /// Publish an event
    pub fn publish<T: Clone + Debug + Send + Sync + 'static>(&self, event: T) -> Result<usize> {
        self.0.publish(event)
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventReceiver<T>> {
        self.0.subscribe()
    }

    /// Number of live subscribers for an event type
    pub fn receiver_count<T: Clone + Debug + Send + Sync + 'static>(&self) -> usize {
        self.0.receiver_count::<T>()
    }
}
