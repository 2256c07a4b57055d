mod availability;
mod error;
mod guest;
mod lifecycle;
mod mutations;
mod queries;
mod store;
mod validate;

pub use availability::{PeriodCatalog, merge_adjacent};
pub use error::{EngineError, Field, FieldProblem, GuestInputError, RangeRejection};
pub use guest::{FormValue, GuestForm, ManualBooking, ManualBookingForm, is_valid_email, validate_guest, validate_manual};
pub use lifecycle::{check_transition, display_status, expires_at, is_urgent, next_status, time_left};
pub use queries::CalendarDay;
pub use store::{InMemoryStore, SharedBooking, apply_event};
pub use validate::{nights_between, prorate, validate};

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::limits::MAX_ACTIVITY_ENTRIES;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

/// Source of "now". Swappable so tests can move time.
pub type Clock = Arc<dyn Fn() -> Ms + Send + Sync>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Each wake-up drains every queued append into one
/// batch and pays for a single fsync; non-append commands run between
/// batches.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("journal flush failed: {e}");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray bytes don't bleed into
    // the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) catalog: RwLock<Arc<PeriodCatalog>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) activity: RwLock<VecDeque<ActivityEntry>>,
    pub(super) ids: Mutex<ulid::Generator>,
    pub(super) clock: Clock,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot cannot miss an append that lands mid-rewrite.
    pub(super) compaction_gate: RwLock<()>,
}

fn push_activity(log: &mut VecDeque<ActivityEntry>, entry: ActivityEntry) {
    if log.len() >= MAX_ACTIVITY_ENTRIES {
        log.pop_front();
    }
    log.push_back(entry);
}

/// Fold journal events into bookings (in first-seen order) and the
/// activity log. Runs before the engine is shared, so no locks.
fn replay(events: Vec<Event>) -> (Vec<Booking>, VecDeque<ActivityEntry>) {
    let mut bookings: Vec<Booking> = Vec::new();
    let mut index: HashMap<Ulid, usize> = HashMap::new();
    let mut activity = VecDeque::new();

    for event in events {
        match &event {
            Event::BookingCreated { booking, .. } => {
                push_activity(&mut activity, ActivityEntry::from_event(&event, None));
                match index.get(&booking.id) {
                    Some(&i) => bookings[i] = booking.clone(),
                    None => {
                        index.insert(booking.id, bookings.len());
                        bookings.push(booking.clone());
                    }
                }
            }
            other => {
                let Some(&i) = index.get(&other.booking_id()) else {
                    tracing::warn!(id = %other.booking_id(), "journal event for unknown booking");
                    continue;
                };
                let prev = bookings[i].status;
                apply_event(&mut bookings[i], other);
                push_activity(&mut activity, ActivityEntry::from_event(other, Some(prev)));
            }
        }
    }
    (bookings, activity)
}

impl Engine {
    /// Replay the journal at `wal_path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, catalog: PeriodCatalog, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let replayed = events.len();
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let (bookings, activity) = replay(events);
        tracing::info!(
            path = %wal_path.display(),
            events = replayed,
            bookings = bookings.len(),
            periods = catalog.len(),
            "engine ready"
        );

        Ok(Self {
            store: InMemoryStore::from_bookings(bookings),
            catalog: RwLock::new(Arc::new(catalog)),
            wal_tx,
            notify,
            activity: RwLock::new(activity),
            ids: Mutex::new(ulid::Generator::new()),
            clock: Arc::new(lifecycle::now_ms),
            compaction_gate: RwLock::new(()),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> Ms {
        (self.clock)()
    }

    /// Monotonic within this process, so ids sort by creation.
    pub(super) fn next_id(&self) -> Ulid {
        let mut generator = match self.ids.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        generator.generate().unwrap_or_else(|_| Ulid::new())
    }

    /// Durably journal one event via the group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) async fn record_activity(&self, entry: ActivityEntry) {
        push_activity(&mut *self.activity.write().await, entry);
    }

    /// Journal, apply, log and broadcast a transition. The caller holds the
    /// booking's write guard for the whole call.
    pub(super) async fn persist_and_apply(&self, booking: &mut Booking, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        let prev = booking.status;
        apply_event(booking, event);
        self.record_activity(ActivityEntry::from_event(event, Some(prev)))
            .await;
        self.notify.send(booking.id, event);
        if booking.status.is_terminal() {
            // Subscribers drain the final event, then see the channel close.
            self.notify.remove(&booking.id);
        }
        Ok(())
    }
}
