use std::time::{SystemTime, UNIX_EPOCH};

use crate::limits::{EXPIRY_WINDOW_MS, URGENT_WINDOW_MS};
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Expiry instant for a booking created at `created_at`.
pub fn expires_at(created_at: Ms) -> Ms {
    created_at + EXPIRY_WINDOW_MS
}

/// Pure transition table. `None` means the move is not allowed from `from`.
pub fn next_status(from: BookingStatus, transition: Transition) -> Option<BookingStatus> {
    use BookingStatus::*;
    match (from, transition) {
        (Pending, Transition::Confirm) => Some(Confirmed),
        (Pending | Confirmed, Transition::Cancel) => Some(Cancelled),
        (Pending, Transition::Expire) => Some(Cancelled),
        _ => None,
    }
}

/// The one place expiry is decided. Strictly after `expires_at`.
pub fn display_status(booking: &Booking, now: Ms) -> DisplayStatus {
    match booking.status {
        BookingStatus::Pending if now > booking.expires_at => DisplayStatus::Expired,
        BookingStatus::Pending => DisplayStatus::Pending,
        BookingStatus::Confirmed => DisplayStatus::Confirmed,
        BookingStatus::Cancelled => DisplayStatus::Cancelled,
    }
}

/// Milliseconds until expiry while the booking is still payable.
pub fn time_left(booking: &Booking, now: Ms) -> Option<Ms> {
    match display_status(booking, now) {
        DisplayStatus::Pending => Some(booking.expires_at - now),
        _ => None,
    }
}

pub fn is_urgent(booking: &Booking, now: Ms) -> bool {
    time_left(booking, now).is_some_and(|left| left <= URGENT_WINDOW_MS)
}

/// Check that `actor` may apply `transition` to `booking` right now and
/// return the resulting stored status.
pub fn check_transition(
    booking: &Booking,
    transition: Transition,
    actor: &Actor,
    now: Ms,
) -> Result<BookingStatus, EngineError> {
    match transition {
        Transition::Confirm | Transition::Cancel if !actor.is_operator() => {
            return Err(EngineError::Forbidden("operator role required"));
        }
        Transition::Expire if *actor != Actor::System => {
            return Err(EngineError::Forbidden("expiry is a system action"));
        }
        _ => {}
    }

    let invalid = EngineError::InvalidTransition {
        id: booking.id,
        from: booking.status,
        transition,
    };
    if transition == Transition::Expire && display_status(booking, now) != DisplayStatus::Expired {
        return Err(invalid);
    }
    next_status(booking.status, transition).ok_or(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    const CREATED: Ms = 1_750_000_000_000;

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            resort: "Dolphin Cove".into(),
            unit_type: "1BR".into(),
            check_in: NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 6, 7).unwrap(),
            nights: 4,
            cost: 40_000,
            booking_code: None,
            guest_id: "g@x.io".into(),
            guest: GuestInfo {
                email: "g@x.io".into(),
                first_name: "Ana".into(),
                last_name: "Lee".into(),
                party_size: Some(2),
            },
            status,
            created_at: CREATED,
            expires_at: expires_at(CREATED),
            last_updated_at: CREATED,
            origin: Origin::GuestInitiated,
            added_by: None,
            cancel_reason: None,
        }
    }

    fn operator() -> Actor {
        Actor::Operator("ops".into())
    }

    #[test]
    fn transition_table() {
        use BookingStatus::*;
        assert_eq!(next_status(Pending, Transition::Confirm), Some(Confirmed));
        assert_eq!(next_status(Pending, Transition::Cancel), Some(Cancelled));
        assert_eq!(next_status(Confirmed, Transition::Cancel), Some(Cancelled));
        assert_eq!(next_status(Confirmed, Transition::Confirm), None);
        assert_eq!(next_status(Confirmed, Transition::Expire), None);
        for t in [Transition::Confirm, Transition::Cancel, Transition::Expire] {
            assert_eq!(next_status(Cancelled, t), None);
        }
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let b = booking(BookingStatus::Pending);
        assert_eq!(display_status(&b, b.expires_at - 1), DisplayStatus::Pending);
        assert_eq!(display_status(&b, b.expires_at), DisplayStatus::Pending);
        assert_eq!(display_status(&b, b.expires_at + 1), DisplayStatus::Expired);
    }

    #[test]
    fn settled_bookings_never_expire() {
        let later = expires_at(CREATED) + 1_000_000;
        assert_eq!(
            display_status(&booking(BookingStatus::Confirmed), later),
            DisplayStatus::Confirmed
        );
        assert_eq!(
            display_status(&booking(BookingStatus::Cancelled), later),
            DisplayStatus::Cancelled
        );
    }

    #[test]
    fn time_left_and_urgency() {
        let b = booking(BookingStatus::Pending);
        assert_eq!(time_left(&b, CREATED), Some(EXPIRY_WINDOW_MS));
        assert!(!is_urgent(&b, CREATED));
        assert!(is_urgent(&b, b.expires_at - URGENT_WINDOW_MS));
        assert_eq!(time_left(&b, b.expires_at + 1), None);
        assert!(!is_urgent(&b, b.expires_at + 1));
        assert_eq!(time_left(&booking(BookingStatus::Confirmed), CREATED), None);
    }

    #[test]
    fn guests_cannot_transition() {
        let b = booking(BookingStatus::Pending);
        let guest = Actor::Guest("g@x.io".into());
        for t in [Transition::Confirm, Transition::Cancel] {
            assert!(matches!(
                check_transition(&b, t, &guest, CREATED),
                Err(EngineError::Forbidden(_))
            ));
        }
    }

    #[test]
    fn expire_needs_system_and_elapsed_deadline() {
        let b = booking(BookingStatus::Pending);
        assert!(matches!(
            check_transition(&b, Transition::Expire, &operator(), b.expires_at + 1),
            Err(EngineError::Forbidden(_))
        ));
        assert!(matches!(
            check_transition(&b, Transition::Expire, &Actor::System, b.expires_at),
            Err(EngineError::InvalidTransition { .. })
        ));
        assert_eq!(
            check_transition(&b, Transition::Expire, &Actor::System, b.expires_at + 1).unwrap(),
            BookingStatus::Cancelled
        );
    }

    #[test]
    fn operator_may_still_confirm_an_expired_booking() {
        let b = booking(BookingStatus::Pending);
        assert_eq!(
            check_transition(&b, Transition::Confirm, &operator(), b.expires_at + 1).unwrap(),
            BookingStatus::Confirmed
        );
    }

    #[test]
    fn invalid_transition_reports_current_status() {
        let b = booking(BookingStatus::Cancelled);
        match check_transition(&b, Transition::Confirm, &operator(), CREATED) {
            Err(EngineError::InvalidTransition { id, from, transition }) => {
                assert_eq!(id, b.id);
                assert_eq!(from, BookingStatus::Cancelled);
                assert_eq!(transition, Transition::Confirm);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }
}
