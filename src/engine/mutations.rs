use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::guest::{GuestForm, ManualBookingForm, validate_guest, validate_manual};
use super::lifecycle::{check_transition, expires_at};
use super::{Engine, EngineError, PeriodCatalog, WalCommand};

impl Engine {
    /// Guest path in one call: look up the period, validate the range,
    /// then create the booking.
    pub async fn book(
        &self,
        period_id: PeriodId,
        range: DateRange,
        guest_id: &str,
        form: &GuestForm,
    ) -> Result<Booking, EngineError> {
        let proposal = self.validate(period_id, &range).await?;
        self.create_from_proposal(proposal, guest_id, form).await
    }

    /// Mint a pending booking from a validated proposal.
    pub async fn create_from_proposal(
        &self,
        proposal: PricedProposal,
        guest_id: &str,
        form: &GuestForm,
    ) -> Result<Booking, EngineError> {
        let guest_id = guest_id.trim();
        if guest_id.is_empty() {
            return Err(EngineError::Forbidden("guest identity required"));
        }
        let guest = validate_guest(form)?;
        let now = self.now();
        let booking_code = Some(proposal.period.booking_code.clone()).filter(|c| !c.is_empty());

        let booking = Booking {
            id: self.next_id(),
            resort: proposal.resort,
            unit_type: proposal.unit_type,
            check_in: proposal.check_in,
            check_out: proposal.check_out,
            nights: proposal.nights,
            cost: proposal.cost,
            booking_code,
            guest_id: guest_id.to_string(),
            guest,
            status: BookingStatus::Pending,
            created_at: now,
            expires_at: expires_at(now),
            last_updated_at: now,
            origin: Origin::GuestInitiated,
            added_by: None,
            cancel_reason: None,
        };
        self.insert_new(booking, Actor::Guest(guest_id.to_string()))
            .await
    }

    /// Operator-entered booking. Not checked against availability periods.
    pub async fn create_manual(&self, form: &ManualBookingForm, actor: &Actor) -> Result<Booking, EngineError> {
        if !actor.is_operator() {
            return Err(EngineError::Forbidden("operator role required"));
        }
        let manual = validate_manual(form)?;
        let now = self.now();

        let booking = Booking {
            id: self.next_id(),
            resort: manual.resort,
            unit_type: manual.unit_type,
            check_in: manual.check_in,
            check_out: manual.check_out,
            nights: manual.nights,
            cost: manual.cost,
            booking_code: None,
            guest_id: manual.guest.email.clone(),
            guest: manual.guest,
            status: BookingStatus::Pending,
            created_at: now,
            expires_at: expires_at(now),
            last_updated_at: now,
            origin: Origin::OperatorManual,
            added_by: Some(actor.id().to_string()),
            cancel_reason: None,
        };
        self.insert_new(booking, actor.clone()).await
    }

    async fn insert_new(&self, booking: Booking, actor: Actor) -> Result<Booking, EngineError> {
        let _gate = self.compaction_gate.read().await;
        if self.store.len() >= MAX_BOOKINGS {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        if self.store.contains(&booking.id) {
            error!(id = %booking.id, "minted a booking id that already exists");
            return Err(EngineError::DuplicateId(booking.id));
        }

        let event = Event::BookingCreated {
            booking: booking.clone(),
            actor,
        };
        self.wal_append(&event).await?;
        self.store.insert(booking.clone()).await?;
        self.record_activity(ActivityEntry::from_event(&event, None))
            .await;
        self.notify.send(booking.id, &event);

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL, "origin" => booking.origin.as_str())
            .increment(1);
        info!(
            id = %booking.id,
            guest = %booking.guest_id,
            resort = %booking.resort,
            check_in = %booking.check_in,
            check_out = %booking.check_out,
            origin = booking.origin.as_str(),
            "booking created"
        );
        Ok(booking)
    }

    pub async fn confirm(&self, id: Ulid, actor: &Actor) -> Result<Booking, EngineError> {
        self.transition(id, Transition::Confirm, actor).await
    }

    pub async fn cancel(&self, id: Ulid, actor: &Actor) -> Result<Booking, EngineError> {
        self.transition(id, Transition::Cancel, actor).await
    }

    /// System cancellation of a pending booking past its deadline.
    pub async fn expire(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, Transition::Expire, &Actor::System).await
    }

    /// Check and apply under the booking's write lock, so two racing
    /// operators serialize and the loser sees the winner's status.
    async fn transition(&self, id: Ulid, transition: Transition, actor: &Actor) -> Result<Booking, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.store.write(&id).await?;
        let now = self.now();

        if let Err(e) = check_transition(&guard, transition, actor, now) {
            debug!(%id, %actor, %transition, "transition rejected: {e}");
            return Err(e);
        }

        let event = match transition {
            Transition::Confirm => Event::BookingConfirmed {
                id,
                at: now,
                actor: actor.clone(),
            },
            Transition::Cancel => Event::BookingCancelled {
                id,
                at: now,
                actor: actor.clone(),
                reason: CancelReason::Operator,
            },
            Transition::Expire => Event::BookingCancelled {
                id,
                at: now,
                actor: actor.clone(),
                reason: CancelReason::Expired,
            },
        };
        let from = guard.status;
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(observability::TRANSITIONS_TOTAL, "event" => transition.as_str()).increment(1);
        info!(%id, %actor, %from, to = %guard.status, "booking {transition}");
        Ok(guard.clone())
    }

    /// Swap in a fresh ingestion result. Existing bookings are untouched.
    pub async fn replace_catalog(&self, periods: Vec<AvailabilityPeriod>) -> usize {
        let catalog = PeriodCatalog::new(periods);
        let len = catalog.len();
        *self.catalog.write().await = Arc::new(catalog);
        info!(periods = len, "availability catalog replaced");
        len
    }

    /// Rewrite the journal as one creation snapshot per booking.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let events: Vec<Event> = self
            .store
            .all()
            .await
            .into_iter()
            .map(|booking| {
                let actor = match booking.origin {
                    Origin::GuestInitiated => Actor::Guest(booking.guest_id.clone()),
                    Origin::OperatorManual => {
                        Actor::Operator(booking.added_by.clone().unwrap_or_default())
                    }
                };
                Event::BookingCreated { booking, actor }
            })
            .collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(bookings = count, "journal compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
