use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::lifecycle::display_status;
use super::validate::validate;
use super::{Engine, EngineError, PeriodCatalog, RangeRejection};

/// One cell of the guest calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub available: bool,
    /// First period covering the date, if any.
    pub period: Option<PeriodId>,
}

fn rejected(rejection: RangeRejection) -> EngineError {
    metrics::counter!(observability::VALIDATION_REJECTIONS_TOTAL, "reason" => rejection.code()).increment(1);
    rejection.into()
}

fn check_window(range: &DateRange) -> Result<(), EngineError> {
    if range.end < range.start {
        return Err(RangeRejection::NonPositiveDuration {
            check_in: range.start,
            check_out: range.end,
        }
        .into());
    }
    if range.nights() >= MAX_CALENDAR_DAYS {
        return Err(EngineError::LimitExceeded("calendar window too wide"));
    }
    Ok(())
}

impl Engine {
    /// Current catalog. Cheap; callers keep a consistent view while the
    /// catalog is being replaced.
    pub async fn catalog(&self) -> Arc<PeriodCatalog> {
        self.catalog.read().await.clone()
    }

    /// Live feedback for a guest's date picker. Never mutates anything.
    pub async fn validate(&self, period_id: PeriodId, range: &DateRange) -> Result<PricedProposal, EngineError> {
        let catalog = self.catalog().await;
        let period = catalog
            .get(period_id)
            .ok_or(EngineError::UnknownPeriod(period_id))?;
        validate(period, range).map_err(rejected)
    }

    /// Validate against `period_id` when given, otherwise against whichever
    /// period contains the check-in.
    pub async fn quote(
        &self,
        period_id: Option<PeriodId>,
        range: &DateRange,
    ) -> Result<(PeriodId, PricedProposal), EngineError> {
        match period_id {
            Some(id) => Ok((id, self.validate(id, range).await?)),
            None => self.catalog().await.validate_range(range).map_err(rejected),
        }
    }

    /// Calendar cells for `range`, both ends included.
    pub async fn calendar(&self, range: &DateRange) -> Result<Vec<CalendarDay>, EngineError> {
        check_window(range)?;
        let catalog = self.catalog().await;
        Ok(range
            .start
            .iter_days()
            .take_while(|d| *d <= range.end)
            .map(|date| CalendarDay {
                date,
                available: catalog.is_date_available(date),
                period: catalog.period_for_date(date).map(|(id, _)| id),
            })
            .collect())
    }

    /// Only the bookable dates in `range`, both ends included.
    pub async fn available_dates(&self, range: &DateRange) -> Result<Vec<NaiveDate>, EngineError> {
        check_window(range)?;
        Ok(self.catalog().await.available_dates(range))
    }

    pub async fn get(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.store.get(&id).await.ok_or(EngineError::NotFound(id))
    }

    pub async fn list(&self, filter: &BookingFilter) -> Vec<Booking> {
        self.store.list(filter, self.now()).await
    }

    /// A guest's own bookings, newest first.
    pub async fn list_for_guest(&self, guest_id: &str) -> Vec<Booking> {
        let filter = BookingFilter::for_guest(guest_id).sorted(SortOrder::CreatedDesc);
        self.list(&filter).await
    }

    pub async fn display_status(&self, id: Ulid) -> Result<DisplayStatus, EngineError> {
        let booking = self.get(id).await?;
        Ok(display_status(&booking, self.now()))
    }

    pub async fn status_counts(&self) -> StatusCounts {
        let now = self.now();
        let mut counts = StatusCounts::default();
        for booking in self.store.all().await {
            counts.total += 1;
            match booking.status {
                BookingStatus::Pending => counts.pending += 1,
                BookingStatus::Confirmed => counts.confirmed += 1,
                BookingStatus::Cancelled => counts.cancelled += 1,
            }
            if display_status(&booking, now) == DisplayStatus::Expired {
                counts.expired += 1;
            }
        }
        counts
    }

    /// Most recent activity first.
    pub async fn activity(&self, limit: usize) -> Vec<ActivityEntry> {
        let log = self.activity.read().await;
        log.iter().rev().take(limit).cloned().collect()
    }

    /// Pending bookings whose deadline has passed at `now`.
    pub async fn collect_expired_pending(&self, now: Ms) -> Vec<Ulid> {
        let filter = BookingFilter {
            display: Some(DisplayStatus::Expired),
            ..BookingFilter::default()
        };
        self.store
            .list(&filter, now)
            .await
            .into_iter()
            .map(|b| b.id)
            .collect()
    }

    pub fn booking_count(&self) -> usize {
        self.store.len()
    }
}
