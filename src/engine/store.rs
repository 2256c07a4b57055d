use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::error;
use ulid::Ulid;

use crate::model::*;

use super::lifecycle::display_status;
use super::EngineError;

pub type SharedBooking = Arc<RwLock<Booking>>;

/// Keyed booking collection. Each booking sits behind its own lock so
/// transitions on different bookings never contend.
pub struct InMemoryStore {
    bookings: DashMap<Ulid, SharedBooking>,
    /// Insertion order, for stable listings.
    order: RwLock<Vec<Ulid>>,
    by_guest: DashMap<String, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            order: RwLock::new(Vec::new()),
            by_guest: DashMap::new(),
        }
    }

    /// Build from replayed state without touching any lock asynchronously.
    /// Later duplicates overwrite earlier ones.
    pub fn from_bookings(bookings: Vec<Booking>) -> Self {
        let map = DashMap::with_capacity(bookings.len());
        let by_guest: DashMap<String, Vec<Ulid>> = DashMap::new();
        let mut order = Vec::with_capacity(bookings.len());
        for booking in bookings {
            let id = booking.id;
            if !map.contains_key(&id) {
                order.push(id);
                by_guest.entry(booking.guest_id.clone()).or_default().push(id);
            }
            map.insert(id, Arc::new(RwLock::new(booking)));
        }
        Self {
            bookings: map,
            order: RwLock::new(order),
            by_guest,
        }
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.bookings.contains_key(id)
    }

    pub fn get_shared(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// Snapshot of one booking.
    pub async fn get(&self, id: &Ulid) -> Option<Booking> {
        let shared = self.get_shared(id)?;
        let guard = shared.read().await;
        Some(guard.clone())
    }

    /// Add a freshly minted booking. A duplicate id is a defect upstream.
    pub async fn insert(&self, booking: Booking) -> Result<(), EngineError> {
        let id = booking.id;
        let guest_id = booking.guest_id.clone();
        match self.bookings.entry(id) {
            Entry::Occupied(_) => {
                error!(%id, "booking id collision in store");
                return Err(EngineError::DuplicateId(id));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(booking)));
            }
        }
        self.order.write().await.push(id);
        self.by_guest.entry(guest_id).or_default().push(id);
        Ok(())
    }

    /// Owned write guard, held by the engine across the journal append.
    pub async fn write(&self, id: &Ulid) -> Result<OwnedRwLockWriteGuard<Booking>, EngineError> {
        let shared = self.get_shared(id).ok_or(EngineError::NotFound(*id))?;
        Ok(shared.write_owned().await)
    }

    /// Read-modify-write under the booking's lock. The mutator works on a
    /// copy; nothing is stored unless it returns `Ok`.
    pub async fn update<T>(
        &self,
        id: &Ulid,
        mutate: impl FnOnce(&mut Booking) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut guard = self.write(id).await?;
        let mut draft = guard.clone();
        let out = mutate(&mut draft)?;
        *guard = draft;
        Ok(out)
    }

    pub fn ids_for_guest(&self, guest_id: &str) -> Vec<Ulid> {
        self.by_guest
            .get(guest_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Filtered snapshot. Insertion order unless the filter asks for a sort.
    pub async fn list(&self, filter: &BookingFilter, now: Ms) -> Vec<Booking> {
        let ids = match &filter.guest_id {
            Some(guest) => self.ids_for_guest(guest),
            None => self.order.read().await.clone(),
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(shared) = self.get_shared(&id) else { continue };
            let booking = shared.read().await;
            if filter.status.is_some_and(|s| booking.status != s) {
                continue;
            }
            if filter
                .display
                .is_some_and(|d| display_status(&booking, now) != d)
            {
                continue;
            }
            out.push(booking.clone());
        }

        match filter.sort {
            Some(SortOrder::CreatedAsc) => out.sort_by_key(|b| (b.created_at, b.id)),
            Some(SortOrder::CreatedDesc) => {
                out.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)))
            }
            None => {}
        }
        out
    }

    /// Every stored booking in insertion order.
    pub async fn all(&self) -> Vec<Booking> {
        self.list(&BookingFilter::default(), 0).await
    }
}

/// Apply a transition event to a booking the caller has locked.
/// Creation is handled at the map level, not here.
pub fn apply_event(booking: &mut Booking, event: &Event) {
    match event {
        Event::BookingConfirmed { at, .. } => {
            booking.status = BookingStatus::Confirmed;
            booking.last_updated_at = *at;
        }
        Event::BookingCancelled { at, reason, .. } => {
            booking.status = BookingStatus::Cancelled;
            booking.cancel_reason = Some(*reason);
            booking.last_updated_at = *at;
        }
        Event::BookingCreated { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn booking(guest: &str, created_at: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            resort: "Dolphin Cove".into(),
            unit_type: "1BR".into(),
            check_in: NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 6, 7).unwrap(),
            nights: 4,
            cost: 40_000,
            booking_code: None,
            guest_id: guest.into(),
            guest: GuestInfo {
                email: guest.into(),
                first_name: "Ana".into(),
                last_name: "Lee".into(),
                party_size: Some(2),
            },
            status: BookingStatus::Pending,
            created_at,
            expires_at: created_at + crate::limits::EXPIRY_WINDOW_MS,
            last_updated_at: created_at,
            origin: Origin::GuestInitiated,
            added_by: None,
            cancel_reason: None,
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = InMemoryStore::new();
        let b = booking("a@x.io", 1_000);
        store.insert(b.clone()).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&b.id).await.unwrap(), b);
        assert!(store.get(&Ulid::new()).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = InMemoryStore::new();
        let b = booking("a@x.io", 1_000);
        store.insert(b.clone()).await.unwrap();
        let mut dup = booking("b@x.io", 2_000);
        dup.id = b.id;
        assert!(matches!(store.insert(dup).await, Err(EngineError::DuplicateId(id)) if id == b.id));
        // First write wins and indexes are untouched.
        assert_eq!(store.get(&b.id).await.unwrap().guest_id, "a@x.io");
        assert!(store.ids_for_guest("b@x.io").is_empty());
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn update_commits_only_on_ok() {
        let store = InMemoryStore::new();
        let b = booking("a@x.io", 1_000);
        store.insert(b.clone()).await.unwrap();

        let failed: Result<(), _> = store
            .update(&b.id, |bk| {
                bk.status = BookingStatus::Confirmed;
                Err(EngineError::Forbidden("nope"))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(store.get(&b.id).await.unwrap().status, BookingStatus::Pending);

        store
            .update(&b.id, |bk| {
                bk.status = BookingStatus::Confirmed;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.get(&b.id).await.unwrap().status, BookingStatus::Confirmed);

        let missing = Ulid::new();
        assert!(matches!(
            store.update(&missing, |_| Ok(())).await,
            Err(EngineError::NotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn list_filters_and_sorts() {
        let store = InMemoryStore::new();
        let old = booking("a@x.io", 1_000);
        let mid = booking("b@x.io", 2_000);
        let new = booking("a@x.io", 3_000);
        // Insert out of creation order to tell insertion order from sorting.
        for b in [mid.clone(), new.clone(), old.clone()] {
            store.insert(b).await.unwrap();
        }
        store
            .update(&mid.id, |b| {
                b.status = BookingStatus::Confirmed;
                Ok(())
            })
            .await
            .unwrap();

        let ids = |v: Vec<Booking>| v.into_iter().map(|b| b.id).collect::<Vec<_>>();

        assert_eq!(ids(store.all().await), vec![mid.id, new.id, old.id]);
        assert_eq!(
            ids(store.list(&BookingFilter::for_guest("a@x.io"), 0).await),
            vec![new.id, old.id]
        );
        assert_eq!(
            ids(store.list(&BookingFilter::with_status(BookingStatus::Pending), 0).await),
            vec![new.id, old.id]
        );
        assert_eq!(
            ids(store.list(&BookingFilter::default().sorted(SortOrder::CreatedAsc), 0).await),
            vec![old.id, mid.id, new.id]
        );
        assert_eq!(
            ids(store.list(&BookingFilter::default().sorted(SortOrder::CreatedDesc), 0).await),
            vec![new.id, mid.id, old.id]
        );

        // Only `old` is past its deadline at this instant.
        let now = old.expires_at + 1;
        let expired = BookingFilter {
            display: Some(DisplayStatus::Expired),
            ..BookingFilter::default()
        };
        assert_eq!(ids(store.list(&expired, now).await), vec![old.id]);
    }

    #[test]
    fn apply_cancel_records_reason() {
        let mut b = booking("a@x.io", 1_000);
        let id = b.id;
        apply_event(
            &mut b,
            &Event::BookingCancelled {
                id,
                at: 5_000,
                actor: Actor::System,
                reason: CancelReason::Expired,
            },
        );
        assert_eq!(b.status, BookingStatus::Cancelled);
        assert_eq!(b.cancel_reason, Some(CancelReason::Expired));
        assert_eq!(b.last_updated_at, 5_000);
    }

    #[test]
    fn from_bookings_keeps_first_position() {
        let a = booking("a@x.io", 1_000);
        let b = booking("b@x.io", 2_000);
        let mut a2 = a.clone();
        a2.status = BookingStatus::Cancelled;
        let store = InMemoryStore::from_bookings(vec![a.clone(), b.clone(), a2]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.ids_for_guest("a@x.io"), vec![a.id]);
    }
}
