use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::{Booking, Event, format_cents};

const CHANNEL_CAPACITY: usize = 256;

/// Fan-out for booking events: one feed with everything, plus optional
/// per-booking feeds for thread views keyed on the booking id.
pub struct NotifyHub {
    all: broadcast::Sender<Event>,
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            channels: DashMap::new(),
        }
    }

    /// Every event, in commit order.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Events for one booking. Creates the channel if needed.
    pub fn subscribe(&self, booking_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(booking_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op for feeds nobody listens to.
    pub fn send(&self, booking_id: Ulid, event: &Event) {
        let _ = self.all.send(event.clone());
        if let Some(sender) = self.channels.get(&booking_id) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn remove(&self, booking_id: &Ulid) {
        self.channels.remove(booking_id);
    }
}

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Outbound "new booking" notification, e.g. an email to the operator.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn booking_created(&self, booking: &Booking) -> Result<(), SinkError>;
}

/// Writes a summary line per new booking to the log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn booking_created(&self, booking: &Booking) -> Result<(), SinkError> {
        info!(
            id = %booking.id,
            guest = %booking.guest.full_name(),
            email = %booking.guest.email,
            resort = %booking.resort,
            check_in = %booking.check_in,
            check_out = %booking.check_out,
            cost = %format_cents(booking.cost),
            "new booking request"
        );
        Ok(())
    }
}

/// Drive `sink` from the hub's global feed until the hub is dropped.
/// Sink failures are logged and never reach the booking.
pub fn spawn_notifier(hub: &NotifyHub, sink: Arc<dyn NotificationSink>) -> JoinHandle<()> {
    let mut rx = hub.subscribe_all();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(Event::BookingCreated { booking, .. }) => {
                    if let Err(e) = sink.booking_created(&booking).await {
                        warn!(id = %booking.id, "booking notification failed: {e}");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("notifier lagged, {n} events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("notify hub closed, notifier exiting");
                    break;
                }
            }
        }
    })
}
