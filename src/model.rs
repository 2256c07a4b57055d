use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

/// Money in minor units (cents).
pub type Cents = i64;

/// Render cents as a dollar amount, e.g. `$400.00`.
pub fn format_cents(amount: Cents) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}

/// Parse an operator-entered amount such as `$1,250.5` or `300`.
/// At most two fractional digits are accepted.
pub fn parse_cents(input: &str) -> Option<Cents> {
    let cleaned: String = input
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let (whole, frac) = match cleaned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (cleaned.as_str(), ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > 2 || !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: Cents = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: Cents = match frac.len() {
        0 => 0,
        1 => frac.parse::<Cents>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(frac)
}

// ── Availability ─────────────────────────────────────────────────

/// Position of a period inside the catalog it was loaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodId(pub u32);

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An advertised block of calendar time for one resort/unit combination.
/// `start_date..=end_date` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityPeriod {
    pub resort: String,
    pub unit_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub min_stay_nights: u32,
    /// Price of `base_nights` nights; other stays are prorated linearly.
    pub base_cost: Cents,
    pub base_nights: u32,
    /// Opaque code for the external listing link.
    #[serde(default)]
    pub booking_code: String,
}

impl AvailabilityPeriod {
    /// Number of nights between the first and the last advertised date.
    pub fn span_nights(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    /// False when the period is shorter than its own minimum stay.
    pub fn fits_min_stay(&self) -> bool {
        self.span_nights() >= i64::from(self.min_stay_nights)
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn is_well_formed(&self) -> bool {
        self.start_date <= self.end_date && self.min_stay_nights >= 1 && self.base_nights >= 1
    }
}

/// Guest-proposed check-in/check-out pair. Not required to be ordered;
/// the range validator reports inverted or empty ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// A validated, priced stay. Only the range validator constructs these,
/// so holding one proves the range fit its period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedProposal {
    pub(crate) resort: String,
    pub(crate) unit_type: String,
    pub(crate) check_in: NaiveDate,
    pub(crate) check_out: NaiveDate,
    pub(crate) nights: u32,
    pub(crate) cost: Cents,
    pub(crate) period: AvailabilityPeriod,
}

impl PricedProposal {
    pub fn resort(&self) -> &str {
        &self.resort
    }

    pub fn unit_type(&self) -> &str {
        &self.unit_type
    }

    pub fn check_in(&self) -> NaiveDate {
        self.check_in
    }

    pub fn check_out(&self) -> NaiveDate {
        self.check_out
    }

    pub fn nights(&self) -> u32 {
        self.nights
    }

    pub fn cost(&self) -> Cents {
        self.cost
    }

    /// The period this proposal was validated against.
    pub fn period(&self) -> &AvailabilityPeriod {
        &self.period
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a consumer should show. `Expired` is derived from the clock and
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    GuestInitiated,
    OperatorManual,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::GuestInitiated => "guest-initiated",
            Origin::OperatorManual => "operator-manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelReason {
    Operator,
    Expired,
}

/// Who caused a change. Guests and operators are identified by whatever
/// the session layer hands us (usually an email address).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Guest(String),
    Operator(String),
    System,
}

impl Actor {
    pub fn is_operator(&self) -> bool {
        matches!(self, Actor::Operator(_))
    }

    pub fn id(&self) -> &str {
        match self {
            Actor::Guest(id) | Actor::Operator(id) => id,
            Actor::System => "system",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Guest(id) => write!(f, "guest {id}"),
            Actor::Operator(id) => write!(f, "operator {id}"),
            Actor::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestInfo {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Always present for guest-initiated bookings; optional on manual ones.
    pub party_size: Option<u32>,
}

impl GuestInfo {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resort: String,
    pub unit_type: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub nights: u32,
    pub cost: Cents,
    pub booking_code: Option<String>,
    pub guest_id: String,
    pub guest: GuestInfo,
    pub status: BookingStatus,
    pub created_at: Ms,
    /// `created_at + 24h`, fixed at creation.
    pub expires_at: Ms,
    pub last_updated_at: Ms,
    pub origin: Origin,
    /// Operator who entered a manual booking.
    pub added_by: Option<String>,
    pub cancel_reason: Option<CancelReason>,
}

/// Operator- or time-driven state change requested on a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Confirm,
    Cancel,
    /// System cancellation of a pending booking past its expiry.
    Expire,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Confirm => "confirm",
            Transition::Cancel => "cancel",
            Transition::Expire => "expire",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The event types. Flat, no nesting. This is the WAL record format and
/// what subscribers receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
        actor: Actor,
    },
    BookingConfirmed {
        id: Ulid,
        at: Ms,
        actor: Actor,
    },
    BookingCancelled {
        id: Ulid,
        at: Ms,
        actor: Actor,
        reason: CancelReason,
    },
}

impl Event {
    pub fn booking_id(&self) -> Ulid {
        match self {
            Event::BookingCreated { booking, .. } => booking.id,
            Event::BookingConfirmed { id, .. } | Event::BookingCancelled { id, .. } => *id,
        }
    }

    pub fn actor(&self) -> &Actor {
        match self {
            Event::BookingCreated { actor, .. }
            | Event::BookingConfirmed { actor, .. }
            | Event::BookingCancelled { actor, .. } => actor,
        }
    }

    pub fn at(&self) -> Ms {
        match self {
            Event::BookingCreated { booking, .. } => booking.created_at,
            Event::BookingConfirmed { at, .. } | Event::BookingCancelled { at, .. } => *at,
        }
    }
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    CreatedAsc,
    CreatedDesc,
}

/// Restricts a listing. An empty filter is the operator's unrestricted view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub display: Option<DisplayStatus>,
    pub guest_id: Option<String>,
    pub sort: Option<SortOrder>,
}

impl BookingFilter {
    pub fn for_guest(guest_id: impl Into<String>) -> Self {
        Self {
            guest_id: Some(guest_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(status: BookingStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Activity {
    Created { origin: Origin },
    Confirmed,
    Cancelled { reason: CancelReason },
}

/// One line of the operator activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    pub at: Ms,
    pub actor: Actor,
    pub booking_id: Ulid,
    pub action: Activity,
    pub previous_status: Option<BookingStatus>,
}

impl ActivityEntry {
    /// Build the log line an event produces. `previous_status` is the
    /// stored status before the event was applied.
    pub fn from_event(event: &Event, previous_status: Option<BookingStatus>) -> Self {
        let action = match event {
            Event::BookingCreated { booking, .. } => Activity::Created {
                origin: booking.origin,
            },
            Event::BookingConfirmed { .. } => Activity::Confirmed,
            Event::BookingCancelled { reason, .. } => Activity::Cancelled { reason: *reason },
        };
        Self {
            at: event.at(),
            actor: event.actor().clone(),
            booking_id: event.booking_id(),
            action,
            previous_status,
        }
    }
}

/// Per-status totals for the admin summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub cancelled: usize,
    /// Pending bookings whose display status is currently `expired`.
    pub expired: usize,
}
