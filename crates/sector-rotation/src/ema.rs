use crate::week::WeeklySeries;

/// Exponential moving average over the available samples.
///
/// The first sample seeds the average; missing weeks are skipped, not filled.
pub fn ema_smooth(series: &WeeklySeries, period: u32) -> WeeklySeries {
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut out = WeeklySeries::new(series.origin());
    let mut ema: Option<f64> = None;

    for (index, value) in series.iter() {
        let next = match ema {
            None => value,
            Some(prev) => (value - prev) * multiplier + prev,
        };
        ema = Some(next);
        out.push(index, next);
    }

    out
}
