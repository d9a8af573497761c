use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use reqwest::Client;
use rotation_core::{Bar, DateRange, Interval, MarketDataProvider, RotationError};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const BASE_URL: &str = "https://api.polygon.io";
const DEFAULT_RATE_LIMIT: usize = 500;
const MAX_ATTEMPTS: u32 = 3;
const RETRY_WAIT_SECS: u64 = 15;

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            let Some(&oldest) = ts.front() else {
                continue;
            };
            let sleep_dur = (oldest + self.window).duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!(
                "Rate limiter: waiting {:.1}s for Polygon API slot",
                sleep_dur.as_secs_f64()
            );
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Polygon.io aggregates client
#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl PolygonClient {
    /// Client limited by `POLYGON_RATE_LIMIT` requests per minute (default 500).
    /// Free tier keys should set `POLYGON_RATE_LIMIT=5`.
    pub fn new(api_key: String) -> Self {
        let rate_limit: usize = std::env::var("POLYGON_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT);

        Self::with_rate_limit(api_key, rate_limit)
    }

    pub fn with_rate_limit(api_key: String, requests_per_minute: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client,
            rate_limiter: RateLimiter::new(requests_per_minute, Duration::from_secs(60)),
        }
    }

    /// Point the client at another host, e.g. a caching proxy.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RotationError> {
        let request = builder
            .build()
            .map_err(|e| RotationError::ApiError(e.to_string()))?;

        for attempt in 1..=MAX_ATTEMPTS {
            self.rate_limiter.acquire().await;
            let req_clone = request
                .try_clone()
                .ok_or_else(|| RotationError::ApiError("Cannot clone request".to_string()))?;
            let response = self
                .client
                .execute(req_clone)
                .await
                .map_err(|e| RotationError::ApiError(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            tracing::warn!(
                "Polygon 429 rate limited, waiting {}s before retry {}/{}",
                RETRY_WAIT_SECS,
                attempt,
                MAX_ATTEMPTS
            );
            tokio::time::sleep(Duration::from_secs(RETRY_WAIT_SECS)).await;
        }

        Err(RotationError::ApiError(format!(
            "Rate limited by Polygon after {} attempts",
            MAX_ATTEMPTS
        )))
    }

    fn aggregates_url(
        &self,
        symbol: &str,
        multiplier: u32,
        timespan: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> String {
        format!(
            "{}/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            self.base_url,
            symbol,
            multiplier,
            timespan,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        )
    }

    /// Get aggregates (bars) for a symbol
    pub async fn get_aggregates(
        &self,
        symbol: &str,
        multiplier: u32,
        timespan: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Bar>, RotationError> {
        let url = self.aggregates_url(symbol, multiplier, timespan, from, to);

        let response = self
            .send_request(self.client.get(&url).query(&[
                ("apiKey", self.api_key.as_str()),
                ("adjusted", "true"),
                ("sort", "asc"),
                ("limit", "50000"),
            ]))
            .await?;

        if !response.status().is_success() {
            return Err(RotationError::ApiError(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let agg_response: AggregateResponse = response
            .json()
            .await
            .map_err(|e| RotationError::ApiError(e.to_string()))?;

        Ok(agg_response.into_bars())
    }
}

/// Polygon `(multiplier, timespan)` for a bar interval
fn timespan(interval: Interval) -> (u32, &'static str) {
    match interval {
        Interval::Day1 => (1, "day"),
        Interval::Week1 => (1, "week"),
        Interval::Month1 => (1, "month"),
    }
}

/// Polygon weekly bars open on Sunday; restamp them onto the Monday of the
/// trading week they cover.
fn align_weekly(bars: Vec<Bar>) -> Vec<Bar> {
    bars.into_iter()
        .map(|mut bar| {
            bar.timestamp = week_start(bar.timestamp);
            bar
        })
        .collect()
}

fn week_start(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    if timestamp.weekday() == Weekday::Sun {
        timestamp + chrono::Duration::days(1)
    } else {
        timestamp
    }
}

#[async_trait]
impl MarketDataProvider for PolygonClient {
    async fn get_historical_data(
        &self,
        symbol: &str,
        range: &DateRange,
        interval: Interval,
    ) -> Result<Vec<Bar>, RotationError> {
        let (multiplier, span) = timespan(interval);
        let mut bars = self
            .get_aggregates(symbol, multiplier, span, range.start, range.end)
            .await?;
        if interval == Interval::Week1 {
            bars = align_weekly(bars);
        }

        if bars.is_empty() {
            return Err(RotationError::ApiError(format!(
                "No historical data for {} between {} and {}",
                symbol, range.start, range.end
            )));
        }

        tracing::debug!("Fetched {} {} bars for {}", bars.len(), span, symbol);
        Ok(bars)
    }
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp (ms)
    o: f64, // open
    h: f64, // high
    l: f64, // low
    c: f64, // close
    v: f64, // volume
}

impl AggregateResponse {
    fn into_bars(self) -> Vec<Bar> {
        self.results
            .into_iter()
            .filter_map(|r| {
                Some(Bar {
                    timestamp: DateTime::from_timestamp_millis(r.t)?,
                    open: r.o,
                    high: r.h,
                    low: r.l,
                    close: r.c,
                    volume: r.v,
                })
            })
            .collect()
    }
}
