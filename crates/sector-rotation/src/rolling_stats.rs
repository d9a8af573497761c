//! Online mean/variance (Welford) over a sliding window of weeks.

use std::collections::VecDeque;

use crate::week::WeeklySeries;

/// Population mean and variance of the values currently in a window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RollingStats {
    pub mean: f64,
    pub variance: f64,
    pub count: u32,
}

impl RollingStats {
    pub fn add(self, value: f64) -> Self {
        let count = self.count + 1;
        let n = count as f64;
        let mean = self.mean + (value - self.mean) / n;
        let variance =
            (self.count as f64 * self.variance + (value - self.mean) * (value - mean)) / n;

        Self {
            mean,
            variance: variance.max(0.0),
            count,
        }
    }

    /// Inverse of [`add`](Self::add). Removing the last value resets to empty.
    pub fn remove(self, value: f64) -> Self {
        if self.count <= 1 {
            return Self::default();
        }

        let count = self.count - 1;
        let n = count as f64;
        // Incremental form keeps the mean exact when `value == mean`.
        let mean = self.mean - (value - self.mean) / n;
        let variance =
            (self.count as f64 * self.variance - (value - self.mean) * (value - mean)) / n;

        Self {
            mean,
            variance: variance.max(0.0),
            count,
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    /// `None` while the window is empty or flat.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        if self.count == 0 || self.variance <= 0.0 {
            return None;
        }
        let z = (value - self.mean) / self.std_dev();
        z.is_finite().then_some(z)
    }
}

/// FIFO of `(week_index, value)` spanning at most `width` consecutive weeks.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    width: i64,
    queue: VecDeque<(i64, f64)>,
    stats: RollingStats,
}

impl RollingWindow {
    pub fn new(width: u32) -> Self {
        Self {
            width: width.max(1) as i64,
            queue: VecDeque::with_capacity(width as usize),
            stats: RollingStats::default(),
        }
    }

    /// Slide the window to `index`, add `value`, and return its z-score.
    pub fn push(&mut self, index: i64, value: f64) -> Option<f64> {
        let oldest_kept = index - self.width + 1;
        while let Some(&(front, old)) = self.queue.front() {
            if front >= oldest_kept {
                break;
            }
            self.stats = self.stats.remove(old);
            self.queue.pop_front();
        }

        self.queue.push_back((index, value));
        self.stats = self.stats.add(value);
        self.stats.z_score(value)
    }

    pub fn stats(&self) -> RollingStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Rolling z-score of every sample; weeks with a flat window are dropped.
pub fn rolling_z_scores(series: &WeeklySeries, window_weeks: u32) -> WeeklySeries {
    let mut window = RollingWindow::new(window_weeks);
    let mut out = WeeklySeries::new(series.origin());
    for (index, value) in series.iter() {
        if let Some(z) = window.push(index, value) {
            out.push(index, z);
        }
    }
    out
}
