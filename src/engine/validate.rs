use chrono::NaiveDate;

use crate::model::*;

use super::error::RangeRejection;

/// Nights between two calendar dates; negative when inverted.
pub fn nights_between(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days()
}

/// `base_cost / base_nights * nights`, rounded to the cent (half away from zero).
pub fn prorate(base_cost: Cents, base_nights: u32, nights: u32) -> Cents {
    let numerator = i128::from(base_cost) * i128::from(nights);
    let denominator = i128::from(base_nights.max(1));
    let rounded = if numerator >= 0 {
        (2 * numerator + denominator) / (2 * denominator)
    } else {
        (2 * numerator - denominator) / (2 * denominator)
    };
    rounded as Cents
}

/// Check a candidate range against one period and price it.
///
/// Checks run in a fixed order so the first failing one is reported:
/// check-in before the period, check-out after it, empty or inverted range,
/// then the minimum stay. All comparisons are on calendar dates.
///
/// A single period is contiguous, so containment here is also gap-free
/// coverage. Ranges straddling two adjacent periods are rejected by the
/// containment checks of whichever period is tried.
pub fn validate(period: &AvailabilityPeriod, range: &DateRange) -> Result<PricedProposal, RangeRejection> {
    if range.start < period.start_date {
        return Err(RangeRejection::BeforePeriodStart {
            check_in: range.start,
            period_start: period.start_date,
        });
    }
    if range.end > period.end_date {
        return Err(RangeRejection::AfterPeriodEnd {
            check_out: range.end,
            period_end: period.end_date,
        });
    }
    if range.end <= range.start {
        return Err(RangeRejection::NonPositiveDuration {
            check_in: range.start,
            check_out: range.end,
        });
    }
    let nights = nights_between(range.start, range.end);
    if nights < i64::from(period.min_stay_nights) {
        return Err(RangeRejection::BelowMinimumStay {
            nights,
            min_stay_nights: period.min_stay_nights,
        });
    }

    // Bounded by the period span, which fits comfortably in u32.
    let nights = nights as u32;
    Ok(PricedProposal {
        resort: period.resort.clone(),
        unit_type: period.unit_type.clone(),
        check_in: range.start,
        check_out: range.end,
        nights,
        cost: prorate(period.base_cost, period.base_nights, nights),
        period: period.clone(),
    })
}
