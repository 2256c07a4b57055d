use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::model::*;

use super::error::{EngineError, Field, GuestInputError, RangeRejection};
use super::validate::nights_between;

/// A form field that may arrive as a JSON number or as typed text
/// (`2`, `"2"`, `"$500"`). Interpretation is left to the validators so a
/// bad value is reported against its field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Number(serde_json::Number),
    Text(String),
}

impl FormValue {
    pub fn as_text(&self) -> String {
        match self {
            FormValue::Number(n) => n.to_string(),
            FormValue::Text(s) => s.trim().to_string(),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, FormValue::Text(s) if s.trim().is_empty())
    }
}

impl From<i64> for FormValue {
    fn from(n: i64) -> Self {
        FormValue::Number(n.into())
    }
}

impl From<&str> for FormValue {
    fn from(s: &str) -> Self {
        FormValue::Text(s.to_string())
    }
}

/// Guest details as typed into the booking form. Everything is optional
/// here so that absence can be reported per field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestForm {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub party_size: Option<FormValue>,
}

/// Everything an operator types when entering a booking by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualBookingForm {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub party_size: Option<FormValue>,
    pub resort: Option<String>,
    pub unit_type: Option<String>,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    /// Defaults to the nights between check-in and check-out.
    pub nights: Option<u32>,
    /// Amount in dollars, e.g. `"$500.00"` or `500`.
    pub cost: Option<FormValue>,
}

/// A manual booking that passed the required-field checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualBooking {
    pub guest: GuestInfo,
    pub resort: String,
    pub unit_type: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub nights: u32,
    pub cost: Cents,
}

fn required(value: &Option<String>, field: Field) -> Result<String, GuestInputError> {
    let trimmed = value.as_deref().map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(GuestInputError::absent(field));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(GuestInputError::malformed(field));
    }
    Ok(trimmed.to_string())
}

/// Whole numbers only; `"four"` or `2.5` are malformed, out-of-range
/// integers are `InvalidPartySize`.
fn party_size(value: &FormValue) -> Result<u32, GuestInputError> {
    let value: i64 = value
        .as_text()
        .parse()
        .map_err(|_| GuestInputError::malformed(Field::PartySize))?;
    if !(MIN_PARTY_SIZE..=MAX_PARTY_SIZE).contains(&value) {
        return Err(GuestInputError::InvalidPartySize(value));
    }
    Ok(value as u32)
}

/// `local@domain.tld` shape: one `@`, no whitespace, and a dot inside the
/// domain with something on both sides.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .char_indices()
            .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// Validate the guest half of a booking request. Fields are checked in
/// form order; the first problem is reported.
pub fn validate_guest(form: &GuestForm) -> Result<GuestInfo, GuestInputError> {
    let email = required(&form.email, Field::Email)?;
    if !is_valid_email(&email) {
        return Err(GuestInputError::malformed(Field::Email));
    }
    let first_name = required(&form.first_name, Field::FirstName)?;
    let last_name = required(&form.last_name, Field::LastName)?;
    let size = form
        .party_size
        .as_ref()
        .filter(|v| !v.is_blank())
        .ok_or(GuestInputError::absent(Field::PartySize))?;
    Ok(GuestInfo {
        email,
        first_name,
        last_name,
        party_size: Some(party_size(size)?),
    })
}

/// Required-field checks for operator-entered bookings. Availability
/// periods are deliberately not consulted.
pub fn validate_manual(form: &ManualBookingForm) -> Result<ManualBooking, EngineError> {
    let email = required(&form.email, Field::Email)?;
    let first_name = required(&form.first_name, Field::FirstName)?;
    let last_name = required(&form.last_name, Field::LastName)?;
    let resort = required(&form.resort, Field::Resort)?;
    let check_in = form.check_in.ok_or(GuestInputError::absent(Field::CheckIn))?;
    let check_out = form.check_out.ok_or(GuestInputError::absent(Field::CheckOut))?;
    let cost_text = required(&form.cost.as_ref().map(FormValue::as_text), Field::Cost)?;
    let cost = parse_cents(&cost_text).ok_or(GuestInputError::malformed(Field::Cost))?;

    let span = nights_between(check_in, check_out);
    if span <= 0 {
        return Err(RangeRejection::NonPositiveDuration { check_in, check_out }.into());
    }
    if span > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    let party_size = form
        .party_size
        .as_ref()
        .filter(|v| !v.is_blank())
        .map(party_size)
        .transpose()?;
    let unit_type = form
        .unit_type
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    Ok(ManualBooking {
        guest: GuestInfo {
            email,
            first_name,
            last_name,
            party_size,
        },
        resort,
        unit_type,
        check_in,
        check_out,
        nights: form.nights.unwrap_or(span as u32),
        cost,
    })
}
