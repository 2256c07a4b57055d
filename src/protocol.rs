use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::engine::{EngineError, GuestForm, ManualBookingForm, display_status, is_urgent, time_left};
use crate::limits::HOUR_MS;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    Operator,
}

/// One line of client input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Hello {
        role: Role,
        id: String,
        #[serde(default)]
        password: Option<String>,
    },
    Periods,
    Calendar {
        from: NaiveDate,
        to: NaiveDate,
    },
    AvailableDates {
        from: NaiveDate,
        to: NaiveDate,
    },
    /// Without `period`, the stay is checked against whichever period
    /// contains the check-in.
    Validate {
        #[serde(default)]
        period: Option<PeriodId>,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    Book {
        #[serde(default)]
        period: Option<PeriodId>,
        check_in: NaiveDate,
        check_out: NaiveDate,
        #[serde(default)]
        guest: GuestForm,
    },
    MyBookings,
    Get {
        id: Ulid,
    },
    Confirm {
        id: Ulid,
    },
    Cancel {
        id: Ulid,
    },
    CreateManual {
        booking: ManualBookingForm,
    },
    List {
        #[serde(flatten)]
        filter: BookingFilter,
    },
    Activity {
        #[serde(default)]
        limit: Option<usize>,
    },
    Summary,
}

pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(trimmed).map_err(|e| ProtocolError::Parse(e.to_string()))
}

/// Session-level failures. Engine failures are reported through their own
/// codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Empty,
    Parse(String),
    HelloRequired,
    AuthFailed,
    OperatorOnly,
    GuestOnly,
    LineTooLong,
    AlreadyGreeted,
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Empty => "EmptyRequest",
            ProtocolError::Parse(_) => "BadRequest",
            ProtocolError::HelloRequired => "HelloRequired",
            ProtocolError::AuthFailed => "AuthFailed",
            ProtocolError::OperatorOnly => "OperatorOnly",
            ProtocolError::GuestOnly => "GuestOnly",
            ProtocolError::LineTooLong => "LineTooLong",
            ProtocolError::AlreadyGreeted => "AlreadyGreeted",
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Empty => write!(f, "empty request"),
            ProtocolError::Parse(msg) => write!(f, "bad request: {msg}"),
            ProtocolError::HelloRequired => write!(f, "send hello first"),
            ProtocolError::AuthFailed => write!(f, "authentication failed"),
            ProtocolError::OperatorOnly => write!(f, "operator role required"),
            ProtocolError::GuestOnly => write!(f, "guest role required"),
            ProtocolError::LineTooLong => write!(f, "request line too long"),
            ProtocolError::AlreadyGreeted => write!(f, "session already open; reconnect to switch identity"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<ProtocolError> for ErrorBody {
    fn from(e: ProtocolError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<EngineError> for ErrorBody {
    fn from(e: EngineError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// One line of server output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<ErrorBody>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

impl From<Result<Value, ErrorBody>> for Response {
    fn from(result: Result<Value, ErrorBody>) -> Self {
        match result {
            Ok(data) => Response::ok(data),
            Err(e) => Response::err(e),
        }
    }
}

/// A booking as clients see it: stored fields plus the clock-derived ones.
#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub display_status: DisplayStatus,
    /// Whole hours left to pay, rounded up. Only while pending.
    pub hours_left: Option<i64>,
    pub urgent: bool,
}

impl BookingView {
    pub fn new(booking: Booking, now: Ms) -> Self {
        Self {
            display_status: display_status(&booking, now),
            hours_left: time_left(&booking, now).map(|ms| (ms + HOUR_MS - 1) / HOUR_MS),
            urgent: is_urgent(&booking, now),
            booking,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodView {
    pub id: PeriodId,
    #[serde(flatten)]
    pub period: AvailabilityPeriod,
    pub latest_check_in: Option<NaiveDate>,
    /// False when the period is too short for its own minimum stay.
    pub bookable: bool,
}

/// A priced stay together with the period it was validated against.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteView {
    pub period_id: PeriodId,
    #[serde(flatten)]
    pub proposal: PricedProposal,
}
