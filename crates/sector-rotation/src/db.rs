use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rotation_core::{
    Quadrant, RotationDataPoint, RotationError, RotationReadRepository, RotationWriteRepository,
};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;

const DATE_FORMAT: &str = "%Y-%m-%d";

const UPSERT: &str = r#"
    INSERT INTO sector_rotation_data_points
        (date, sector_symbol, price, relative_strength, x, y, quadrant, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(date, sector_symbol) DO UPDATE SET
        price = excluded.price,
        relative_strength = excluded.relative_strength,
        x = excluded.x,
        y = excluded.y,
        quadrant = excluded.quadrant,
        updated_at = excluded.updated_at
"#;

const SELECT_COLUMNS: &str =
    "SELECT date, sector_symbol, price, relative_strength, x, y, quadrant FROM sector_rotation_data_points";

fn upsert_query(point: &RotationDataPoint) -> Query<'static, Sqlite, SqliteArguments<'static>> {
    sqlx::query(UPSERT)
        .bind(format_date(point.date))
        .bind(point.sector_symbol.clone())
        .bind(point.price)
        .bind(point.relative_strength)
        .bind(point.x)
        .bind(point.y)
        .bind(point.quadrant.as_str())
        .bind(Utc::now().to_rfc3339())
}

fn db_err(e: sqlx::Error) -> RotationError {
    RotationError::DatabaseError(e.to_string())
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(value: &str) -> Result<NaiveDate, RotationError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| RotationError::DatabaseError(format!("Invalid stored date {}: {}", value, e)))
}

#[derive(Debug, sqlx::FromRow)]
struct RotationRow {
    date: String,
    sector_symbol: String,
    price: f64,
    relative_strength: f64,
    x: f64,
    y: f64,
    quadrant: String,
}

impl TryFrom<RotationRow> for RotationDataPoint {
    type Error = RotationError;

    fn try_from(row: RotationRow) -> Result<Self, Self::Error> {
        RotationDataPoint::with_quadrant(
            parse_date(&row.date)?,
            &row.sector_symbol,
            row.price,
            row.relative_strength,
            row.x,
            row.y,
            Quadrant::from_str(&row.quadrant)?,
        )
    }
}

/// SQLite store for rotation points
#[derive(Clone)]
pub struct RotationDb {
    pool: SqlitePool,
}

impl RotationDb {
    /// Connect and apply the schema
    pub async fn new(database_url: &str) -> Result<Self, RotationError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true);

        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let db = Self { pool };
        db.init_schema().await?;

        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), RotationError> {
        let schema = include_str!("../schema.sql");

        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await.map_err(db_err)?;
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn latest_date(&self, sector_symbol: Option<&str>) -> Result<Option<NaiveDate>, RotationError> {
        let latest: Option<String> = match sector_symbol {
            Some(symbol) => sqlx::query_scalar(
                "SELECT MAX(date) FROM sector_rotation_data_points WHERE sector_symbol = ?",
            )
            .bind(symbol.trim().to_uppercase())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?,
            None => sqlx::query_scalar("SELECT MAX(date) FROM sector_rotation_data_points")
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?,
        };

        latest.as_deref().map(parse_date).transpose()
    }
}

#[async_trait]
impl RotationReadRepository for RotationDb {
    async fn find_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RotationDataPoint>, RotationError> {
        let rows = sqlx::query_as::<_, RotationRow>(&format!(
            "{} WHERE date >= ? AND date <= ? ORDER BY date, sector_symbol",
            SELECT_COLUMNS
        ))
        .bind(format_date(start))
        .bind(format_date(end))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(RotationDataPoint::try_from).collect()
    }

    async fn find_by_sector_and_date_range(
        &self,
        sector_symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RotationDataPoint>, RotationError> {
        let rows = sqlx::query_as::<_, RotationRow>(&format!(
            "{} WHERE sector_symbol = ? AND date >= ? AND date <= ? ORDER BY date",
            SELECT_COLUMNS
        ))
        .bind(sector_symbol.trim().to_uppercase())
        .bind(format_date(start))
        .bind(format_date(end))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(RotationDataPoint::try_from).collect()
    }

    async fn find_existing_dates(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        sector_symbols: &[String],
    ) -> Result<BTreeSet<NaiveDate>, RotationError> {
        if sector_symbols.is_empty() {
            return Ok(BTreeSet::new());
        }

        let placeholders = vec!["?"; sector_symbols.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT date FROM sector_rotation_data_points \
             WHERE date >= ? AND date <= ? AND sector_symbol IN ({})",
            placeholders
        );

        let mut query = sqlx::query_scalar::<_, String>(&sql)
            .bind(format_date(start))
            .bind(format_date(end));
        for symbol in sector_symbols {
            query = query.bind(symbol.trim().to_uppercase());
        }

        let dates = query.fetch_all(&self.pool).await.map_err(db_err)?;
        dates.iter().map(|d| parse_date(d)).collect()
    }

    async fn find_latest_date(&self) -> Result<Option<NaiveDate>, RotationError> {
        self.latest_date(None).await
    }

    async fn find_latest_date_by_sector(
        &self,
        sector_symbol: &str,
    ) -> Result<Option<NaiveDate>, RotationError> {
        self.latest_date(Some(sector_symbol)).await
    }
}

#[async_trait]
impl RotationWriteRepository for RotationDb {
    async fn save(&self, point: &RotationDataPoint) -> Result<(), RotationError> {
        upsert_query(point)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn save_many(&self, points: &[RotationDataPoint]) -> Result<(), RotationError> {
        if points.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for point in points {
            upsert_query(point)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        tracing::debug!("Upserted {} rotation points", points.len());
        Ok(())
    }

    async fn delete_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Result<(), RotationError> {
        let result = sqlx::query("DELETE FROM sector_rotation_data_points WHERE date >= ? AND date <= ?")
            .bind(format_date(start))
            .bind(format_date(end))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        tracing::info!(
            "Deleted {} rotation points between {} and {}",
            result.rows_affected(),
            start,
            end
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, month, day).unwrap()
    }

    fn point(date: NaiveDate, symbol: &str, x: f64) -> RotationDataPoint {
        RotationDataPoint::new(date, symbol, 42.0, 97.5, x, 101.0).unwrap()
    }

    async fn memory_db() -> RotationDb {
        RotationDb::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_db_creation() {
        let db = memory_db().await;
        assert!(db.pool().acquire().await.is_ok());
        assert_eq!(db.find_latest_date().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_many_and_read_back_ordered() {
        let db = memory_db().await;
        db.save_many(&[
            point(d(1, 15), "XLK", 1.0),
            point(d(1, 8), "XLK", 2.0),
            point(d(1, 8), "XLE", 3.0),
        ])
        .await
        .unwrap();

        let points = db.find_by_date_range(d(1, 1), d(1, 31)).await.unwrap();
        let keys: Vec<_> = points.iter().map(|p| (p.date, p.sector_symbol.as_str())).collect();
        assert_eq!(keys, vec![(d(1, 8), "XLE"), (d(1, 8), "XLK"), (d(1, 15), "XLK")]);
        assert_eq!(points[0].quadrant, Quadrant::from_coordinates(3.0, 101.0));
        assert_eq!(points[1].price, 42.0);
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_same_key() {
        let db = memory_db().await;
        db.save(&point(d(1, 8), "XLK", 1.0)).await.unwrap();
        db.save_many(&[point(d(1, 8), "XLK", 5.0)]).await.unwrap();

        let points = db
            .find_by_sector_and_date_range("xlk", d(1, 1), d(1, 31))
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].x, 5.0);
    }

    #[tokio::test]
    async fn test_existing_and_latest_dates() {
        let db = memory_db().await;
        db.save_many(&[
            point(d(1, 8), "XLK", 1.0),
            point(d(1, 15), "XLE", 1.0),
            point(d(1, 22), "XLF", 1.0),
        ])
        .await
        .unwrap();

        let symbols = vec!["XLK".to_string(), "XLE".to_string()];
        let existing = db
            .find_existing_dates(d(1, 1), d(1, 31), &symbols)
            .await
            .unwrap();
        assert_eq!(existing.into_iter().collect::<Vec<_>>(), vec![d(1, 8), d(1, 15)]);
        assert!(db.find_existing_dates(d(1, 1), d(1, 31), &[]).await.unwrap().is_empty());

        assert_eq!(db.find_latest_date().await.unwrap(), Some(d(1, 22)));
        assert_eq!(db.find_latest_date_by_sector("XLK").await.unwrap(), Some(d(1, 8)));
        assert_eq!(db.find_latest_date_by_sector("XLU").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_by_date_range() {
        let db = memory_db().await;
        db.save_many(&[point(d(1, 8), "XLK", 1.0), point(d(2, 5), "XLK", 1.0)])
            .await
            .unwrap();

        db.delete_by_date_range(d(1, 1), d(1, 31)).await.unwrap();

        let remaining = db.find_by_date_range(d(1, 1), d(12, 31)).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].date, d(2, 5));
    }
}
