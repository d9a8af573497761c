//! Weekly incremental update job
//!
//! Fires at 19:00 UTC on Friday, Saturday and Sunday so the week's closes are
//! in before Monday. Runs after the first successful one of a weekend are
//! no-ops thanks to the incremental cadence guard.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use rotation_core::Sector;

use crate::persistence::{IncrementalUpdate, RotationPersistenceService};

pub const RUN_HOUR_UTC: u32 = 19;
pub const RUN_DAYS: [Weekday; 3] = [Weekday::Fri, Weekday::Sat, Weekday::Sun];

/// Next scheduled instant strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    (0..=7)
        .map(|offset| today + Duration::days(offset))
        .filter(|day| RUN_DAYS.contains(&day.weekday()))
        .filter_map(|day| day.and_hms_opt(RUN_HOUR_UTC, 0, 0))
        .map(|naive| naive.and_utc())
        .find(|candidate| *candidate > now)
        .unwrap_or(now + Duration::weeks(1))
}

pub struct WeeklyRotationJob {
    persistence: Arc<RotationPersistenceService>,
    sectors: Vec<Sector>,
}

impl WeeklyRotationJob {
    pub fn new(persistence: Arc<RotationPersistenceService>, sectors: Vec<Sector>) -> Self {
        Self {
            persistence,
            sectors,
        }
    }

    pub async fn run_once(&self) -> Option<IncrementalUpdate> {
        self.run_once_as_of(Utc::now().date_naive()).await
    }

    /// One incremental update. Failures are logged, never returned.
    pub async fn run_once_as_of(&self, today: NaiveDate) -> Option<IncrementalUpdate> {
        tracing::info!(
            "🔄 Weekly rotation update starting for {} sectors",
            self.sectors.len()
        );

        match self
            .persistence
            .compute_and_save_incremental_as_of(&self.sectors, today)
            .await
        {
            Ok(update) => {
                tracing::info!("✅ Weekly rotation update finished: {:?}", update);
                Some(update)
            }
            Err(e) => {
                tracing::error!("❌ Weekly rotation update failed: {}", e);
                None
            }
        }
    }

    /// Sleep until each scheduled instant and run, until `shutdown` resolves.
    pub async fn run_scheduled<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let now = Utc::now();
            let next = next_run_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::info!("Next rotation update at {}", next);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.run_once().await;
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping rotation schedule");
                    break;
                }
            }
        }
    }
}
