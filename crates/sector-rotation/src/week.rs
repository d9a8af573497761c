//! Week bucketing
//!
//! Weeks are ISO weeks (Monday start). Weekly series are keyed by the Monday
//! of the week and, inside calculations, by an integer week index counted
//! from a Monday origin.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rotation_core::Bar;

/// ISO week key, e.g. `2024-W07`.
pub fn week_key(date: NaiveDate) -> String {
    let iso = date.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

/// Monday of the ISO week containing `date`.
pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

pub fn is_monday(date: NaiveDate) -> bool {
    date.weekday() == Weekday::Mon
}

/// Collapse raw `(date, price)` points into one price per week, keyed by Monday.
///
/// Within a week the Monday-dated point wins; without one, the first point
/// seen is kept. A Monday point arriving after a non-Monday choice replaces it.
pub fn bucket_weekly<I>(points: I) -> BTreeMap<NaiveDate, f64>
where
    I: IntoIterator<Item = (NaiveDate, f64)>,
{
    let mut chosen: BTreeMap<NaiveDate, (NaiveDate, f64)> = BTreeMap::new();

    for (date, price) in points {
        match chosen.entry(monday_of(date)) {
            Entry::Vacant(slot) => {
                slot.insert((date, price));
            }
            Entry::Occupied(mut slot) => {
                let (kept_date, _) = *slot.get();
                if is_monday(date) && !is_monday(kept_date) {
                    slot.insert((date, price));
                }
            }
        }
    }

    chosen
        .into_iter()
        .map(|(monday, (_, price))| (monday, price))
        .collect()
}

/// Weekly closing prices from provider bars.
pub fn weekly_closes(bars: &[Bar]) -> BTreeMap<NaiveDate, f64> {
    bucket_weekly(bars.iter().map(|b| (b.timestamp.date_naive(), b.close)))
}

/// Sparse weekly series of `(week_index, value)` sorted by index.
///
/// Index 0 is the week starting at `origin` (a Monday).
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklySeries {
    origin: NaiveDate,
    points: Vec<(i64, f64)>,
}

impl WeeklySeries {
    pub fn new(origin: NaiveDate) -> Self {
        Self {
            origin: monday_of(origin),
            points: Vec::new(),
        }
    }

    pub fn from_prices(origin: NaiveDate, prices: &BTreeMap<NaiveDate, f64>) -> Self {
        let mut series = Self::new(origin);
        for (&date, &price) in prices {
            let index = series.index_of(date);
            series.push(index, price);
        }
        series
    }

    pub fn origin(&self) -> NaiveDate {
        self.origin
    }

    pub fn index_of(&self, date: NaiveDate) -> i64 {
        (monday_of(date) - self.origin).num_days().div_euclid(7)
    }

    pub fn date_of(&self, index: i64) -> NaiveDate {
        self.origin + Duration::weeks(index)
    }

    /// Append a value. Indices must be strictly increasing.
    pub fn push(&mut self, index: i64, value: f64) {
        debug_assert!(
            self.points.last().map_or(true, |&(last, _)| last < index),
            "week indices must be strictly increasing"
        );
        self.points.push((index, value));
    }

    pub fn get(&self, index: i64) -> Option<f64> {
        self.points
            .binary_search_by_key(&index, |&(i, _)| i)
            .ok()
            .map(|pos| self.points[pos].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.points.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn map_values<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        Self {
            origin: self.origin,
            points: self.points.iter().map(|&(i, v)| (i, f(v))).collect(),
        }
    }

    /// Differences between consecutive samples, stamped at the later sample.
    pub fn first_differences(&self) -> Self {
        Self {
            origin: self.origin,
            points: self
                .points
                .windows(2)
                .map(|pair| (pair[1].0, pair[1].1 - pair[0].1))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_week_key_uses_iso_year() {
        assert_eq!(week_key(d(2024, 2, 14)), "2024-W07");
        // 2021-01-03 is a Sunday belonging to ISO week 53 of 2020.
        assert_eq!(week_key(d(2021, 1, 3)), "2020-W53");
        // 2024-12-30 is a Monday in ISO week 1 of 2025.
        assert_eq!(week_key(d(2024, 12, 30)), "2025-W01");
    }

    #[test]
    fn test_monday_of() {
        assert_eq!(monday_of(d(2024, 1, 10)), d(2024, 1, 8));
        assert_eq!(monday_of(d(2024, 1, 14)), d(2024, 1, 8));
        assert_eq!(monday_of(d(2024, 1, 8)), d(2024, 1, 8));
        assert_eq!(monday_of(d(2024, 1, 1)), d(2024, 1, 1));
    }

    #[test]
    fn test_monday_of_is_idempotent() {
        let mut date = d(2023, 12, 20);
        for _ in 0..400 {
            let monday = monday_of(date);
            assert_eq!(monday_of(monday), monday);
            assert!(is_monday(monday));
            assert_eq!(week_key(monday), week_key(date));
            date += Duration::days(1);
        }
    }

    #[test]
    fn test_bucket_prefers_monday() {
        let weekly = bucket_weekly(vec![
            (d(2024, 1, 10), 2.0), // Wednesday, first seen
            (d(2024, 1, 8), 1.0),  // Monday arrives later and wins
            (d(2024, 1, 12), 3.0),
        ]);
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[&d(2024, 1, 8)], 1.0);
    }

    #[test]
    fn test_bucket_keeps_first_without_monday() {
        let weekly = bucket_weekly(vec![
            (d(2024, 1, 11), 5.0),
            (d(2024, 1, 9), 4.0),
            (d(2024, 1, 16), 6.0),
        ]);
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[&d(2024, 1, 8)], 5.0);
        assert_eq!(weekly[&d(2024, 1, 15)], 6.0);
    }

    #[test]
    fn test_weekly_closes_from_bars() {
        let bar = |day: u32, close: f64| Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 5, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
        };
        let weekly = weekly_closes(&[bar(8, 10.0), bar(15, 11.0), bar(17, 12.0)]);
        assert_eq!(weekly.values().copied().collect::<Vec<_>>(), vec![10.0, 11.0]);
    }

    #[test]
    fn test_weekly_series_indexing() {
        let mut prices = BTreeMap::new();
        prices.insert(d(2024, 1, 8), 10.0);
        prices.insert(d(2024, 1, 22), 12.0);

        let series = WeeklySeries::from_prices(d(2024, 1, 3), &prices);
        assert_eq!(series.origin(), d(2024, 1, 1));
        assert_eq!(series.get(1), Some(10.0));
        assert_eq!(series.get(2), None);
        assert_eq!(series.get(3), Some(12.0));
        assert_eq!(series.date_of(3), d(2024, 1, 22));
        assert_eq!(series.index_of(d(2023, 12, 27)), -1);
    }

    #[test]
    fn test_first_differences_skip_gaps() {
        let mut series = WeeklySeries::new(d(2024, 1, 1));
        series.push(0, 1.0);
        series.push(1, 3.0);
        series.push(4, 2.0);

        let diffs: Vec<_> = series.first_differences().iter().collect();
        assert_eq!(diffs, vec![(1, 2.0), (4, -1.0)]);
    }
}
