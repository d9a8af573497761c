//! Cached rotation results
//!
//! Decides per request whether the persisted points already cover a range or
//! whether to recompute, and reconciles fresh points with persisted ones.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rotation_core::{
    DateRange, RotationCalculator, RotationDataPoint, RotationError, RotationParams,
    RotationReadRepository, RotationResult, RotationWriteRepository, Sector,
};

/// Weeks computed on a cold start
pub const COLD_START_WEEKS: u32 = 52;
/// Minimum days between two incremental recomputations
pub const MIN_DAYS_BETWEEN_UPDATES: i64 = 5;

/// What an incremental update did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncrementalUpdate {
    /// Nothing was persisted yet; the cold-start window was computed.
    Initialized { saved: usize },
    /// The latest persisted week is too recent to recompute.
    UpToDate { latest: NaiveDate, days_elapsed: i64 },
    /// Points newer than `since` were computed and saved.
    Updated { since: NaiveDate, saved: usize },
}

pub struct RotationPersistenceService {
    calculator: Arc<dyn RotationCalculator>,
    reader: Arc<dyn RotationReadRepository>,
    writer: Arc<dyn RotationWriteRepository>,
    params: RotationParams,
}

impl RotationPersistenceService {
    pub fn new(
        calculator: Arc<dyn RotationCalculator>,
        reader: Arc<dyn RotationReadRepository>,
        writer: Arc<dyn RotationWriteRepository>,
        params: RotationParams,
    ) -> Self {
        Self {
            calculator,
            reader,
            writer,
            params,
        }
    }

    pub fn params(&self) -> &RotationParams {
        &self.params
    }

    /// Cold start: compute and save the trailing year ending today.
    pub async fn initialize_last_n_weeks(
        &self,
        sectors: &[Sector],
    ) -> Result<RotationResult, RotationError> {
        self.initialize_last_n_weeks_as_of(sectors, Utc::now().date_naive())
            .await
    }

    pub async fn initialize_last_n_weeks_as_of(
        &self,
        sectors: &[Sector],
        today: NaiveDate,
    ) -> Result<RotationResult, RotationError> {
        let range = DateRange::trailing_weeks(today, COLD_START_WEEKS)?;
        tracing::info!(
            "Initializing rotation data for last {} weeks ({} to {})",
            COLD_START_WEEKS,
            range.start,
            range.end
        );

        let result = self.calculator.calculate(sectors, &range, &self.params).await?;
        self.writer.save_many(&result.data_points).await?;

        tracing::info!("Saved {} rotation points", result.data_points.len());
        Ok(result)
    }

    pub async fn compute_and_save_incremental(
        &self,
        sectors: &[Sector],
    ) -> Result<IncrementalUpdate, RotationError> {
        self.compute_and_save_incremental_as_of(sectors, Utc::now().date_naive())
            .await
    }

    /// Recompute the weeks after the latest persisted one.
    pub async fn compute_and_save_incremental_as_of(
        &self,
        sectors: &[Sector],
        today: NaiveDate,
    ) -> Result<IncrementalUpdate, RotationError> {
        let Some(latest) = self.reader.find_latest_date().await? else {
            tracing::info!("No persisted rotation data, running cold start");
            let result = self.initialize_last_n_weeks_as_of(sectors, today).await?;
            return Ok(IncrementalUpdate::Initialized {
                saved: result.data_points.len(),
            });
        };

        let days_elapsed = (today - latest).num_days();
        if days_elapsed < MIN_DAYS_BETWEEN_UPDATES {
            tracing::debug!(
                "Latest rotation week {} is {} days old, skipping update",
                latest,
                days_elapsed
            );
            return Ok(IncrementalUpdate::UpToDate {
                latest,
                days_elapsed,
            });
        }

        let lookback = Duration::weeks(self.params.lookback_weeks() as i64);
        let range = DateRange::new(latest - lookback, today)?;
        let result = self.calculator.calculate(sectors, &range, &self.params).await?;

        let newer: Vec<RotationDataPoint> = result
            .data_points
            .into_iter()
            .filter(|p| p.date > latest)
            .collect();

        if newer.is_empty() {
            tracing::info!("No rotation weeks newer than {}", latest);
        } else {
            self.writer.save_many(&newer).await?;
            tracing::info!("Saved {} rotation points newer than {}", newer.len(), latest);
        }

        Ok(IncrementalUpdate::Updated {
            since: latest,
            saved: newer.len(),
        })
    }

    /// Persisted points for `range` when every week is covered, otherwise a
    /// recomputation merged with whatever was persisted.
    ///
    /// Points are ordered by date, then by the order of `sectors`.
    pub async fn get_or_compute(
        &self,
        sectors: &[Sector],
        range: &DateRange,
    ) -> Result<RotationResult, RotationError> {
        if sectors.is_empty() {
            return Err(RotationError::Validation(
                "At least one sector is required".to_string(),
            ));
        }

        let symbols: Vec<String> = sectors.iter().map(|s| s.symbol.clone()).collect();
        let wanted: HashSet<&str> = symbols.iter().map(String::as_str).collect();

        let persisted: Vec<RotationDataPoint> = self
            .reader
            .find_by_date_range(range.start, range.end)
            .await?
            .into_iter()
            .filter(|p| wanted.contains(p.sector_symbol.as_str()))
            .collect();
        let existing = self
            .reader
            .find_existing_dates(range.start, range.end, &symbols)
            .await?;

        let expected = range.mondays();
        let covered = !expected.is_empty() && expected.iter().all(|d| existing.contains(d));

        if covered {
            tracing::info!(
                "Rotation cache hit for {} to {} ({} points)",
                range.start,
                range.end,
                persisted.len()
            );
            return build_result(range, merge_points(persisted, Vec::new(), &symbols), symbols);
        }

        tracing::info!(
            "Rotation cache miss for {} to {} ({}/{} weeks persisted), recomputing",
            range.start,
            range.end,
            expected.iter().filter(|d| existing.contains(d)).count(),
            expected.len()
        );

        let extended = range.extend_back_weeks(self.params.lookback_weeks())?;
        let computed = self
            .calculator
            .calculate(sectors, &extended, &self.params)
            .await?;

        let fresh: Vec<RotationDataPoint> = computed
            .data_points
            .into_iter()
            .filter(|p| range.contains(p.date) && wanted.contains(p.sector_symbol.as_str()))
            .collect();

        if !fresh.is_empty() {
            self.writer.save_many(&fresh).await?;
        }

        build_result(range, merge_points(persisted, fresh, &symbols), symbols)
    }
}

fn build_result(
    range: &DateRange,
    points: Vec<RotationDataPoint>,
    symbols: Vec<String>,
) -> Result<RotationResult, RotationError> {
    if points.is_empty() {
        return Err(RotationError::InsufficientData(format!(
            "No rotation points between {} and {}",
            range.start, range.end
        )));
    }
    RotationResult::new(range.start, range.end, points, symbols)
}

/// Union of persisted and fresh points with one point per `(date, sector)`.
///
/// For a repeated key the first point seen (persisted before fresh) is kept.
/// Output is sorted by date, then by position of the sector in `order`.
pub fn merge_points(
    persisted: Vec<RotationDataPoint>,
    fresh: Vec<RotationDataPoint>,
    order: &[String],
) -> Vec<RotationDataPoint> {
    let mut by_key: HashMap<(NaiveDate, String), RotationDataPoint> = HashMap::new();

    for point in persisted.into_iter().chain(fresh) {
        let key = (point.date, point.sector_symbol.clone());
        by_key.entry(key).or_insert(point);
    }

    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();

    let mut merged: Vec<RotationDataPoint> = by_key.into_values().collect();
    merged.sort_by(|a, b| {
        let pa = position.get(a.sector_symbol.as_str()).copied().unwrap_or(usize::MAX);
        let pb = position.get(b.sector_symbol.as_str()).copied().unwrap_or(usize::MAX);
        a.date
            .cmp(&b.date)
            .then(pa.cmp(&pb))
            .then_with(|| a.sector_symbol.cmp(&b.sector_symbol))
    });
    merged
}
