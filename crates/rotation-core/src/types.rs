use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::RotationError;

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bar interval requested from a market-data provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Day1,
    Week1,
    Month1,
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RotationError> {
        if start > end {
            return Err(RotationError::Validation(format!(
                "Start date {} must not be after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// The trailing `weeks` weeks ending on `end`.
    pub fn trailing_weeks(end: NaiveDate, weeks: u32) -> Result<Self, RotationError> {
        Ok(Self {
            start: weeks_before(end, weeks)?,
            end,
        })
    }

    /// Same end date, start moved back by `weeks` whole weeks.
    pub fn extend_back_weeks(&self, weeks: u32) -> Result<Self, RotationError> {
        Ok(Self {
            start: weeks_before(self.start, weeks)?,
            end: self.end,
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Mondays falling inside the range, ascending.
    pub fn mondays(&self) -> Vec<NaiveDate> {
        let offset = (7 - self.start.weekday().num_days_from_monday()) % 7;
        let mut current = self.start + Duration::days(offset as i64);
        let mut mondays = Vec::new();
        while current <= self.end {
            mondays.push(current);
            current += Duration::weeks(1);
        }
        mondays
    }
}

fn weeks_before(date: NaiveDate, weeks: u32) -> Result<NaiveDate, RotationError> {
    Duration::try_weeks(weeks as i64)
        .and_then(|span| date.checked_sub_signed(span))
        .ok_or_else(|| {
            RotationError::Validation(format!(
                "{} weeks before {} is out of the supported date range",
                weeks, date
            ))
        })
}

/// EMA period applied to relative strength and to its week-over-week change.
pub const RS_SMOOTHING_PERIOD: u32 = 5;
pub const DEFAULT_NORMALIZATION_WINDOW_WEEKS: u32 = 14;
pub const DEFAULT_MOMENTUM_WEEKS: u32 = 1;

/// Parameters of one RRG calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationParams {
    pub momentum_weeks: u32,
    pub normalization_window_weeks: u32,
}

impl Default for RotationParams {
    fn default() -> Self {
        Self {
            momentum_weeks: DEFAULT_MOMENTUM_WEEKS,
            normalization_window_weeks: DEFAULT_NORMALIZATION_WINDOW_WEEKS,
        }
    }
}

impl RotationParams {
    pub fn validate(&self) -> Result<(), RotationError> {
        if self.momentum_weeks < 1 {
            return Err(RotationError::Validation(format!(
                "momentum_weeks must be at least 1, got {}",
                self.momentum_weeks
            )));
        }
        if self.normalization_window_weeks < 1 {
            return Err(RotationError::Validation(format!(
                "normalization_window_weeks must be at least 1, got {}",
                self.normalization_window_weeks
            )));
        }
        Ok(())
    }

    /// History needed before the first reported week.
    pub fn lookback_weeks(&self) -> u32 {
        self.normalization_window_weeks
            .max(self.momentum_weeks)
            .max(RS_SMOOTHING_PERIOD)
    }
}

/// A sector, identified by its ETF symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sector {
    pub symbol: String,
    pub name: String,
}

const STANDARD_SECTORS: [(&str, &str); 11] = [
    ("XLK", "Technology"),
    ("XLE", "Energy"),
    ("XLI", "Industrial"),
    ("XLY", "Consumer Discretionary"),
    ("XLP", "Consumer Staples"),
    ("XLV", "Healthcare"),
    ("XLF", "Financial"),
    ("XLB", "Materials"),
    ("XLU", "Utilities"),
    ("XLRE", "Real Estate"),
    ("XLC", "Communication Services"),
];

impl Sector {
    pub fn new(symbol: &str, name: &str) -> Result<Self, RotationError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(RotationError::Validation(
                "Sector symbol cannot be empty".to_string(),
            ));
        }
        let name = match name.trim() {
            "" => symbol.clone(),
            n => n.to_string(),
        };
        Ok(Self { symbol, name })
    }

    /// The 11 SPDR sector ETFs
    pub fn standard_sectors() -> Vec<Sector> {
        STANDARD_SECTORS
            .iter()
            .map(|(symbol, name)| Sector {
                symbol: symbol.to_string(),
                name: name.to_string(),
            })
            .collect()
    }

    pub fn from_etf_symbol(symbol: &str) -> Option<Sector> {
        let wanted = symbol.trim().to_uppercase();
        Self::standard_sectors()
            .into_iter()
            .find(|s| s.symbol == wanted)
    }

    pub fn from_name(name: &str) -> Option<Sector> {
        let wanted = name.trim();
        Self::standard_sectors()
            .into_iter()
            .find(|s| s.name == wanted)
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.symbol)
    }
}

/// Origin of the RRG quadrant split.
///
/// RS-Ratio and RS-Momentum are centred on 100, so with the split at 0 almost
/// every point classifies as `Leading`. See DESIGN.md before changing it.
pub const QUADRANT_ORIGIN: f64 = 0.0;

/// RRG quadrant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quadrant {
    Leading,
    Weakening,
    Lagging,
    Improving,
}

impl Quadrant {
    pub fn from_coordinates(x: f64, y: f64) -> Self {
        if x > QUADRANT_ORIGIN && y > QUADRANT_ORIGIN {
            Quadrant::Leading
        } else if x > QUADRANT_ORIGIN && y < QUADRANT_ORIGIN {
            Quadrant::Weakening
        } else if x < QUADRANT_ORIGIN && y < QUADRANT_ORIGIN {
            Quadrant::Lagging
        } else {
            Quadrant::Improving
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quadrant::Leading => "Leading",
            Quadrant::Weakening => "Weakening",
            Quadrant::Lagging => "Lagging",
            Quadrant::Improving => "Improving",
        }
    }
}

impl fmt::Display for Quadrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quadrant {
    type Err = RotationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Leading" => Ok(Quadrant::Leading),
            "Weakening" => Ok(Quadrant::Weakening),
            "Lagging" => Ok(Quadrant::Lagging),
            "Improving" => Ok(Quadrant::Improving),
            other => Err(RotationError::Validation(format!(
                "Unknown quadrant: {}",
                other
            ))),
        }
    }
}

/// One RRG coordinate for one sector in one week.
///
/// `date` is the Monday of the week. `(date, sector_symbol)` is the
/// persistence key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationDataPoint {
    pub date: NaiveDate,
    pub sector_symbol: String,
    pub price: f64,
    pub relative_strength: f64,
    pub x: f64,
    pub y: f64,
    pub quadrant: Quadrant,
}

impl RotationDataPoint {
    /// Build a freshly computed point; the quadrant is derived from `(x, y)`.
    pub fn new(
        date: NaiveDate,
        sector_symbol: &str,
        price: f64,
        relative_strength: f64,
        x: f64,
        y: f64,
    ) -> Result<Self, RotationError> {
        Self::with_quadrant(
            date,
            sector_symbol,
            price,
            relative_strength,
            x,
            y,
            Quadrant::from_coordinates(x, y),
        )
    }

    /// Rehydrate a stored point, keeping the quadrant it was saved with.
    pub fn with_quadrant(
        date: NaiveDate,
        sector_symbol: &str,
        price: f64,
        relative_strength: f64,
        x: f64,
        y: f64,
        quadrant: Quadrant,
    ) -> Result<Self, RotationError> {
        let sector_symbol = sector_symbol.trim().to_uppercase();
        if sector_symbol.is_empty() {
            return Err(RotationError::Validation(
                "Sector symbol cannot be empty".to_string(),
            ));
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(RotationError::Validation(format!(
                "Price must be a positive number: {}",
                price
            )));
        }
        if !relative_strength.is_finite() {
            return Err(RotationError::Validation(format!(
                "Relative strength must be a finite number: {}",
                relative_strength
            )));
        }
        if !x.is_finite() {
            return Err(RotationError::Validation(format!(
                "X coordinate must be a finite number: {}",
                x
            )));
        }
        if !y.is_finite() {
            return Err(RotationError::Validation(format!(
                "Y coordinate must be a finite number: {}",
                y
            )));
        }

        Ok(Self {
            date,
            sector_symbol,
            price,
            relative_strength,
            x,
            y,
            quadrant,
        })
    }

    pub fn key(&self) -> (NaiveDate, &str) {
        (self.date, self.sector_symbol.as_str())
    }
}

/// RRG coordinates for a set of sectors over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationResult {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub data_points: Vec<RotationDataPoint>,
    pub sector_symbols: Vec<String>,
}

impl RotationResult {
    pub fn new(
        start_date: NaiveDate,
        end_date: NaiveDate,
        data_points: Vec<RotationDataPoint>,
        sector_symbols: Vec<String>,
    ) -> Result<Self, RotationError> {
        if start_date > end_date {
            return Err(RotationError::Validation(format!(
                "Start date {} must not be after end date {}",
                start_date, end_date
            )));
        }
        if data_points.is_empty() {
            return Err(RotationError::Validation(
                "Data points cannot be empty".to_string(),
            ));
        }
        if sector_symbols.is_empty() {
            return Err(RotationError::Validation(
                "Sector symbols cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            start_date,
            end_date,
            data_points,
            sector_symbols,
        })
    }

    pub fn points_for_sector(&self, symbol: &str) -> Vec<&RotationDataPoint> {
        let wanted = symbol.trim().to_uppercase();
        self.data_points
            .iter()
            .filter(|p| p.sector_symbol == wanted)
            .collect()
    }

    pub fn points_on(&self, date: NaiveDate) -> Vec<&RotationDataPoint> {
        self.data_points.iter().filter(|p| p.date == date).collect()
    }

    /// Points of the most recent week in the result.
    pub fn latest_points(&self) -> Vec<&RotationDataPoint> {
        match self.data_points.iter().map(|p| p.date).max() {
            Some(latest) => self.points_on(latest),
            None => Vec::new(),
        }
    }

    pub fn unique_dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.data_points.iter().map(|p| p.date).collect();
        dates.sort();
        dates.dedup();
        dates
    }
}
