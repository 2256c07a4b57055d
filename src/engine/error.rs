use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::model::{BookingStatus, PeriodId, Transition};

/// Why a candidate range does not fit a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRejection {
    BeforePeriodStart {
        check_in: NaiveDate,
        period_start: NaiveDate,
    },
    AfterPeriodEnd {
        check_out: NaiveDate,
        period_end: NaiveDate,
    },
    NonPositiveDuration {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    BelowMinimumStay {
        nights: i64,
        min_stay_nights: u32,
    },
    /// No advertised period covers the check-in date at all.
    NotAvailable { date: NaiveDate },
}

impl RangeRejection {
    pub fn code(&self) -> &'static str {
        match self {
            RangeRejection::BeforePeriodStart { .. } => "BeforePeriodStart",
            RangeRejection::AfterPeriodEnd { .. } => "AfterPeriodEnd",
            RangeRejection::NonPositiveDuration { .. } => "NonPositiveDuration",
            RangeRejection::BelowMinimumStay { .. } => "BelowMinimumStay",
            RangeRejection::NotAvailable { .. } => "NotAvailable",
        }
    }
}

impl fmt::Display for RangeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeRejection::BeforePeriodStart { check_in, period_start } => write!(
                f,
                "check-in {check_in} is before the period opens on {period_start}"
            ),
            RangeRejection::AfterPeriodEnd { check_out, period_end } => write!(
                f,
                "check-out {check_out} is after the period closes on {period_end}"
            ),
            RangeRejection::NonPositiveDuration { .. } => {
                f.write_str("check-out must be after check-in")
            }
            RangeRejection::BelowMinimumStay { nights, min_stay_nights } => write!(
                f,
                "minimum stay is {min_stay_nights} nights, requested {nights}"
            ),
            RangeRejection::NotAvailable { date } => write!(f, "{date} is not available"),
        }
    }
}

impl std::error::Error for RangeRejection {}

/// Input fields checked when a booking is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Email,
    FirstName,
    LastName,
    PartySize,
    Resort,
    CheckIn,
    CheckOut,
    Cost,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Email => "email",
            Field::FirstName => "first name",
            Field::LastName => "last name",
            Field::PartySize => "party size",
            Field::Resort => "resort",
            Field::CheckIn => "check-in",
            Field::CheckOut => "check-out",
            Field::Cost => "cost",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldProblem {
    Absent,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestInputError {
    MissingGuestField { field: Field, problem: FieldProblem },
    InvalidPartySize(i64),
}

impl GuestInputError {
    pub(crate) fn absent(field: Field) -> Self {
        GuestInputError::MissingGuestField {
            field,
            problem: FieldProblem::Absent,
        }
    }

    pub(crate) fn malformed(field: Field) -> Self {
        GuestInputError::MissingGuestField {
            field,
            problem: FieldProblem::Malformed,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GuestInputError::MissingGuestField { .. } => "MissingGuestField",
            GuestInputError::InvalidPartySize(_) => "InvalidPartySize",
        }
    }
}

impl fmt::Display for GuestInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestInputError::MissingGuestField {
                field,
                problem: FieldProblem::Absent,
            } => write!(f, "{} is required", field.as_str()),
            GuestInputError::MissingGuestField {
                field,
                problem: FieldProblem::Malformed,
            } => write!(f, "{} is not valid", field.as_str()),
            GuestInputError::InvalidPartySize(n) => {
                write!(f, "number of guests must be between 1 and 20, got {n}")
            }
        }
    }
}

impl std::error::Error for GuestInputError {}

#[derive(Debug)]
pub enum EngineError {
    Range(RangeRejection),
    GuestInput(GuestInputError),
    NotFound(Ulid),
    UnknownPeriod(PeriodId),
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        transition: Transition,
    },
    Forbidden(&'static str),
    /// Two bookings minted with the same id. Always a bug.
    DuplicateId(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable identifier for clients to branch on.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Range(r) => r.code(),
            EngineError::GuestInput(g) => g.code(),
            EngineError::NotFound(_) => "NotFound",
            EngineError::UnknownPeriod(_) => "UnknownPeriod",
            EngineError::InvalidTransition { .. } => "InvalidTransition",
            EngineError::Forbidden(_) => "Forbidden",
            EngineError::DuplicateId(_) => "StoreInvariantViolation",
            EngineError::LimitExceeded(_) => "LimitExceeded",
            EngineError::WalError(_) => "WalError",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Range(r) => write!(f, "{r}"),
            EngineError::GuestInput(g) => write!(f, "{g}"),
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::UnknownPeriod(id) => write!(f, "unknown availability period: {id}"),
            EngineError::InvalidTransition { id, from, transition } => {
                write!(f, "cannot {transition} booking {id}: it is {from}")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::DuplicateId(id) => write!(f, "duplicate booking id: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RangeRejection> for EngineError {
    fn from(r: RangeRejection) -> Self {
        EngineError::Range(r)
    }
}

impl From<GuestInputError> for EngineError {
    fn from(g: GuestInputError) -> Self {
        EngineError::GuestInput(g)
    }
}
