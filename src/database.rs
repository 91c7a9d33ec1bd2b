//! PostgreSQL persistence for location records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::errors::GpsRecorderError;
use crate::models::LocationRecord;
use crate::session::LocationSink;

/// A stored location row, as served by the read API.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StoredLocation {
    pub device_id: String,
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub altitude: i16,
    pub heading: i16,
    pub satellites: i16,
    pub speed: i16,
    pub map_url: String,
}

/// Filter and pagination parameters for location queries.
///
/// `page` and `per_page` are one-based and validated by the caller.
#[derive(Debug, Clone)]
pub struct LocationFilter {
    pub device_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub page: u32,
    pub per_page: u32,
}

const SELECT_COLUMNS: &str = "SELECT device_id, time, lat, lon, altitude, heading, \
     satellites, speed, map_url FROM locations WHERE 1=1";

/// Database handle for GPS data
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Wrap an existing pool, applying pending migrations.
    pub async fn new(pool: PgPool) -> Result<Self, GpsRecorderError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Connect to the database given in the configuration.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self, GpsRecorderError> {
        config.validate()?;
        info!("Connecting to database");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Self::new(pool).await
    }

    /// One page of locations matching the filter, newest first, together
    /// with the total number of matching rows.
    pub async fn locations(
        &self,
        filter: &LocationFilter,
    ) -> Result<(Vec<StoredLocation>, i64), GpsRecorderError> {
        let total = self.count(filter).await?;

        let mut query = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        push_filters(&mut query, filter);
        query.push(" ORDER BY time DESC");
        query.push(" LIMIT ").push_bind(i64::from(filter.per_page));
        query
            .push(" OFFSET ")
            .push_bind(i64::from(filter.page - 1) * i64::from(filter.per_page));

        let rows = query
            .build_query_as::<StoredLocation>()
            .fetch_all(&self.pool)
            .await?;

        Ok((rows, total))
    }

    /// The most recent location for a device, `None` if the device has
    /// never reported.
    pub async fn latest_position(
        &self,
        device_id: &str,
    ) -> Result<Option<StoredLocation>, GpsRecorderError> {
        let row = sqlx::query_as::<_, StoredLocation>(
            "SELECT device_id, time, lat, lon, altitude, heading, satellites, speed, map_url
             FROM locations
             WHERE device_id = $1
             ORDER BY time DESC
             LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn count(&self, filter: &LocationFilter) -> Result<i64, GpsRecorderError> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM locations WHERE 1=1");
        push_filters(&mut query, filter);

        let total: i64 = query.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(total)
    }
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &LocationFilter) {
    if let Some(device_id) = &filter.device_id {
        query.push(" AND device_id = ").push_bind(device_id.clone());
    }
    if let Some(start) = filter.start {
        query.push(" AND time >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        query.push(" AND time <= ").push_bind(end);
    }
}

#[async_trait]
impl LocationSink for Database {
    /// Append one record; plain insert, no dedup or upsert.
    async fn append(&self, record: &LocationRecord) -> Result<(), GpsRecorderError> {
        let position = &record.position;
        sqlx::query(
            "INSERT INTO locations (
                device_id, time, lat, lon, altitude, heading,
                satellites, speed, map_url
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.device_id.as_str())
        .bind(position.time)
        .bind(position.lat)
        .bind(position.lon)
        .bind(position.altitude)
        .bind(position.heading)
        .bind(i16::from(position.satellites))
        .bind(position.speed)
        .bind(position.map_url())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
