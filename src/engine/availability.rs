use chrono::{Days, NaiveDate};
use tracing::warn;

use crate::limits::MAX_PERIODS;
use crate::model::*;

use super::error::RangeRejection;
use super::validate::validate;

// ── Period catalog ───────────────────────────────────────────────

/// The queryable availability model. Periods keep their load order and
/// are addressed by position; nothing is merged or deduplicated.
#[derive(Debug, Clone, Default)]
pub struct PeriodCatalog {
    periods: Vec<AvailabilityPeriod>,
}

impl PeriodCatalog {
    /// Build from an ingestion result. Malformed periods are dropped.
    pub fn new(periods: Vec<AvailabilityPeriod>) -> Self {
        let mut kept = Vec::with_capacity(periods.len().min(MAX_PERIODS));
        for period in periods {
            if !period.is_well_formed() {
                warn!(
                    resort = %period.resort,
                    start = %period.start_date,
                    end = %period.end_date,
                    "dropping malformed availability period"
                );
                continue;
            }
            if kept.len() >= MAX_PERIODS {
                warn!("period catalog full, ignoring the rest");
                break;
            }
            kept.push(period);
        }
        Self { periods: kept }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn get(&self, id: PeriodId) -> Option<&AvailabilityPeriod> {
        self.periods.get(id.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeriodId, &AvailabilityPeriod)> {
        self.periods
            .iter()
            .enumerate()
            .map(|(i, p)| (PeriodId(i as u32), p))
    }

    pub fn is_date_available(&self, date: NaiveDate) -> bool {
        self.periods.iter().any(|p| p.covers(date))
    }

    /// First period (in load order) whose inclusive span covers `date`.
    pub fn period_for_date(&self, date: NaiveDate) -> Option<(PeriodId, &AvailabilityPeriod)> {
        self.iter().find(|(_, p)| p.covers(date))
    }

    /// Disjoint covered spans inside `range` (inclusive both ends).
    pub fn covered_spans(&self, range: &DateRange) -> Vec<DateRange> {
        let mut spans: Vec<DateRange> = self
            .periods
            .iter()
            .filter(|p| p.start_date <= range.end && range.start <= p.end_date)
            .map(|p| DateRange::new(p.start_date.max(range.start), p.end_date.min(range.end)))
            .collect();
        spans.sort_by_key(|s| s.start);
        merge_adjacent(&spans)
    }

    /// Every calendar date in `range` that some period covers.
    pub fn available_dates(&self, range: &DateRange) -> Vec<NaiveDate> {
        self.covered_spans(range)
            .iter()
            .flat_map(|span| span.start.iter_days().take_while(move |d| *d <= span.end))
            .collect()
    }

    /// Latest check-in that still leaves room for the minimum stay.
    pub fn latest_check_in(&self, id: PeriodId) -> Option<NaiveDate> {
        let period = self.get(id)?;
        let latest = period
            .end_date
            .checked_sub_days(Days::new(u64::from(period.min_stay_nights)))?;
        (latest >= period.start_date).then_some(latest)
    }

    /// Validate a range against whichever period contains its check-in.
    ///
    /// Ranges straddling adjacent periods fail even when every night is
    /// advertised, because no single period contains them.
    pub fn validate_range(&self, range: &DateRange) -> Result<(PeriodId, PricedProposal), RangeRejection> {
        let mut first_err = None;
        for (id, period) in self.iter().filter(|(_, p)| p.covers(range.start)) {
            match validate(period, range) {
                Ok(proposal) => return Ok((id, proposal)),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        Err(first_err.unwrap_or(RangeRejection::NotAvailable { date: range.start }))
    }
}

/// Merge sorted spans that overlap or touch on consecutive days.
pub fn merge_adjacent(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && last.end.succ_opt().is_some_and(|next| span.start <= next)
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn period(start: NaiveDate, end: NaiveDate, min_stay: u32) -> AvailabilityPeriod {
        AvailabilityPeriod {
            resort: "Dolphin Cove".into(),
            unit_type: "1BR".into(),
            start_date: start,
            end_date: end,
            min_stay_nights: min_stay,
            base_cost: 30_000,
            base_nights: 3,
            booking_code: String::new(),
        }
    }

    fn june_and_july() -> PeriodCatalog {
        PeriodCatalog::new(vec![
            period(date(6, 1), date(6, 10), 3),
            period(date(6, 11), date(6, 20), 2),
            period(date(7, 1), date(7, 5), 2),
        ])
    }

    #[test]
    fn malformed_periods_are_dropped() {
        let mut bad_stay = period(date(6, 1), date(6, 10), 3);
        bad_stay.min_stay_nights = 0;
        let catalog = PeriodCatalog::new(vec![
            period(date(6, 10), date(6, 1), 1),
            bad_stay,
            period(date(6, 1), date(6, 10), 3),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(PeriodId(0)).unwrap().start_date, date(6, 1));
        assert!(catalog.get(PeriodId(1)).is_none());
    }

    #[test]
    fn date_lookup() {
        let catalog = june_and_july();
        assert!(catalog.is_date_available(date(6, 10)));
        assert!(catalog.is_date_available(date(6, 11)));
        assert!(!catalog.is_date_available(date(6, 25)));
        assert_eq!(catalog.period_for_date(date(6, 15)).unwrap().0, PeriodId(1));
        assert!(catalog.period_for_date(date(5, 31)).is_none());
    }

    #[test]
    fn adjacent_periods_render_as_one_span() {
        let catalog = june_and_july();
        let spans = catalog.covered_spans(&DateRange::new(date(6, 5), date(7, 2)));
        assert_eq!(
            spans,
            vec![
                DateRange::new(date(6, 5), date(6, 20)),
                DateRange::new(date(7, 1), date(7, 2)),
            ]
        );
        let days = catalog.available_dates(&DateRange::new(date(6, 18), date(7, 1)));
        assert_eq!(days, vec![date(6, 18), date(6, 19), date(6, 20), date(7, 1)]);
    }

    #[test]
    fn straddling_range_is_rejected() {
        // Every night from 6/8 to 6/13 is advertised, but across two periods.
        let catalog = june_and_july();
        let range = DateRange::new(date(6, 8), date(6, 13));
        assert_eq!(catalog.available_dates(&range).len(), 6);
        assert!(matches!(
            catalog.validate_range(&range),
            Err(RangeRejection::AfterPeriodEnd { .. })
        ));
    }

    #[test]
    fn range_in_second_period_validates() {
        let catalog = june_and_july();
        let (id, proposal) = catalog
            .validate_range(&DateRange::new(date(6, 12), date(6, 15)))
            .unwrap();
        assert_eq!(id, PeriodId(1));
        assert_eq!(proposal.nights(), 3);
        assert_eq!(proposal.cost(), 30_000);
    }

    #[test]
    fn uncovered_check_in_is_not_available() {
        let catalog = june_and_july();
        assert_eq!(
            catalog.validate_range(&DateRange::new(date(6, 25), date(6, 28))),
            Err(RangeRejection::NotAvailable { date: date(6, 25) })
        );
        assert_eq!(
            PeriodCatalog::empty().validate_range(&DateRange::new(date(6, 1), date(6, 4))),
            Err(RangeRejection::NotAvailable { date: date(6, 1) })
        );
    }

    #[test]
    fn latest_check_in_leaves_room_for_min_stay() {
        let catalog = june_and_july();
        assert_eq!(catalog.latest_check_in(PeriodId(0)), Some(date(6, 7)));
        assert_eq!(catalog.latest_check_in(PeriodId(2)), Some(date(7, 3)));
        let range = DateRange::new(date(6, 7), date(6, 10));
        assert_eq!(catalog.validate_range(&range).unwrap().0, PeriodId(0));
        assert_eq!(catalog.latest_check_in(PeriodId(9)), None);

        let tight = PeriodCatalog::new(vec![period(date(6, 1), date(6, 2), 5)]);
        assert_eq!(tight.latest_check_in(PeriodId(0)), None);
    }

    #[test]
    fn merge_keeps_gaps() {
        let spans = vec![
            DateRange::new(date(6, 1), date(6, 3)),
            DateRange::new(date(6, 2), date(6, 4)),
            DateRange::new(date(6, 6), date(6, 7)),
        ];
        assert_eq!(
            merge_adjacent(&spans),
            vec![
                DateRange::new(date(6, 1), date(6, 4)),
                DateRange::new(date(6, 6), date(6, 7)),
            ]
        );
    }
}
