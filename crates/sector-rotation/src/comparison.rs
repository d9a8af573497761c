//! Persisted vs. live rotation comparison

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::try_join;
use rotation_core::{
    DateRange, RotationCalculator, RotationDataPoint, RotationError, RotationResult, Sector,
};
use serde::{Deserialize, Serialize};

use crate::persistence::RotationPersistenceService;

/// Absolute difference under which two values count as equal
pub const MATCH_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub relative_strength: f64,
}

impl From<&RotationDataPoint> for Coordinates {
    fn from(p: &RotationDataPoint) -> Self {
        Self {
            x: p.x,
            y: p.y,
            relative_strength: p.relative_strength,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonDifference {
    pub date: NaiveDate,
    pub sector_symbol: String,
    pub persisted: Option<Coordinates>,
    pub live: Option<Coordinates>,
    /// `live - persisted`, zero unless both sides exist
    pub differences: Coordinates,
}

impl ComparisonDifference {
    fn on_both_sides(&self) -> bool {
        self.persisted.is_some() && self.live.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total_data_points: usize,
    pub matching_data_points: usize,
    pub different_data_points: usize,
    pub max_difference: Coordinates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationComparison {
    pub persisted: RotationResult,
    pub live: RotationResult,
    pub differences: Vec<ComparisonDifference>,
    pub summary: ComparisonSummary,
}

/// Compares what the cache serves against a fresh calculation.
pub struct RotationComparisonService {
    persistence: Arc<RotationPersistenceService>,
    calculator: Arc<dyn RotationCalculator>,
}

impl RotationComparisonService {
    pub fn new(
        persistence: Arc<RotationPersistenceService>,
        calculator: Arc<dyn RotationCalculator>,
    ) -> Self {
        Self {
            persistence,
            calculator,
        }
    }

    pub async fn compare(
        &self,
        sectors: &[Sector],
        range: &DateRange,
    ) -> Result<RotationComparison, RotationError> {
        let params = *self.persistence.params();
        let live_range = range.extend_back_weeks(params.lookback_weeks())?;

        let (persisted, live) = try_join(
            self.persistence.get_or_compute(sectors, range),
            self.calculator.calculate(sectors, &live_range, &params),
        )
        .await?;

        let live_points: Vec<RotationDataPoint> = live
            .data_points
            .into_iter()
            .filter(|p| range.contains(p.date))
            .collect();
        if live_points.is_empty() {
            return Err(RotationError::InsufficientData(format!(
                "Live calculation has no points between {} and {}",
                range.start, range.end
            )));
        }
        let live = RotationResult::new(range.start, range.end, live_points, live.sector_symbols)?;

        let differences = diff_points(&persisted.data_points, &live.data_points);
        let summary = summarize(&differences);

        tracing::info!(
            "Rotation comparison {} to {}: {} rows, {} matching, {} different",
            range.start,
            range.end,
            summary.total_data_points,
            summary.matching_data_points,
            summary.different_data_points
        );

        Ok(RotationComparison {
            persisted,
            live,
            differences,
            summary,
        })
    }
}

/// One row per `(date, sector)` present on either side, sorted by date then symbol.
pub fn diff_points(
    persisted: &[RotationDataPoint],
    live: &[RotationDataPoint],
) -> Vec<ComparisonDifference> {
    let mut rows: BTreeMap<(NaiveDate, String), (Option<Coordinates>, Option<Coordinates>)> =
        BTreeMap::new();

    for p in persisted {
        rows.entry((p.date, p.sector_symbol.clone())).or_default().0 = Some(p.into());
    }
    for p in live {
        rows.entry((p.date, p.sector_symbol.clone())).or_default().1 = Some(p.into());
    }

    rows.into_iter()
        .map(|((date, sector_symbol), (persisted, live))| {
            let differences = match (persisted, live) {
                (Some(p), Some(l)) => Coordinates {
                    x: l.x - p.x,
                    y: l.y - p.y,
                    relative_strength: l.relative_strength - p.relative_strength,
                },
                _ => Coordinates::default(),
            };
            ComparisonDifference {
                date,
                sector_symbol,
                persisted,
                live,
                differences,
            }
        })
        .collect()
}

pub fn summarize(differences: &[ComparisonDifference]) -> ComparisonSummary {
    let mut summary = ComparisonSummary {
        total_data_points: differences.len(),
        ..Default::default()
    };

    for row in differences.iter().filter(|r| r.on_both_sides()) {
        let dx = row.differences.x.abs();
        let dy = row.differences.y.abs();
        let drs = row.differences.relative_strength.abs();

        if dx <= MATCH_TOLERANCE && dy <= MATCH_TOLERANCE && drs <= MATCH_TOLERANCE {
            summary.matching_data_points += 1;
        } else {
            summary.different_data_points += 1;
        }

        let max = &mut summary.max_difference;
        max.x = max.x.max(dx);
        max.y = max.y.max(dy);
        max.relative_strength = max.relative_strength.max(drs);
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn point(date: NaiveDate, symbol: &str, x: f64, y: f64, rs: f64) -> RotationDataPoint {
        RotationDataPoint::new(date, symbol, 10.0, rs, x, y).unwrap()
    }

    #[test]
    fn test_diff_rows_cover_both_sides() {
        let persisted = vec![
            point(d(8), "XLK", 100.0, 100.0, 50.0),
            point(d(8), "XLE", 101.0, 99.0, 20.0),
        ];
        let live = vec![
            point(d(8), "XLK", 100.5, 100.0, 50.0),
            point(d(15), "XLK", 102.0, 98.0, 51.0),
        ];

        let rows = diff_points(&persisted, &live);
        let keys: Vec<_> = rows.iter().map(|r| (r.date, r.sector_symbol.as_str())).collect();
        assert_eq!(keys, vec![(d(8), "XLE"), (d(8), "XLK"), (d(15), "XLK")]);

        assert!(rows[0].live.is_none());
        assert_eq!(rows[0].differences, Coordinates::default());
        assert!((rows[1].differences.x - 0.5).abs() < 1e-12);
        assert!(rows[2].persisted.is_none());
    }

    #[test]
    fn test_summary_counts_only_paired_rows() {
        let persisted = vec![
            point(d(8), "XLK", 100.0, 100.0, 50.0),
            point(d(8), "XLE", 101.0, 99.0, 20.0),
            point(d(8), "XLF", 99.0, 99.0, 30.0),
        ];
        let live = vec![
            point(d(8), "XLK", 100.00001, 100.0, 50.0),
            point(d(8), "XLE", 101.0, 98.0, 20.5),
            point(d(15), "XLK", 102.0, 98.0, 51.0),
        ];

        let summary = summarize(&diff_points(&persisted, &live));
        assert_eq!(summary.total_data_points, 4);
        assert_eq!(summary.matching_data_points, 1);
        assert_eq!(summary.different_data_points, 1);
        assert!((summary.max_difference.y - 1.0).abs() < 1e-9);
        assert!((summary.max_difference.relative_strength - 0.5).abs() < 1e-9);
    }
}
