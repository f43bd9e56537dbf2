use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::{device::DeviceAddress, Error, Result};

const CREATE_READINGS: &str = r#"
    CREATE TABLE IF NOT EXISTS vessel_readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id INTEGER,
        level INTEGER,
        timestamp TEXT
    )
"#;

/// One successful poll of one device. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub device: DeviceAddress,
    pub value: i64,
    pub observed_at: OffsetDateTime,
}

impl Reading {
    pub fn new(device: DeviceAddress, value: i64, observed_at: OffsetDateTime) -> Self {
        Self {
            device,
            value,
            observed_at,
        }
    }
}

/// Append-only log of readings backed by SQLite.
///
/// Each call runs one statement on a connection borrowed from the pool for
/// that statement only, so the poller and the refresh timer never share a
/// transaction.
#[derive(Debug, Clone)]
pub struct SampleStore {
    pool: SqlitePool,
    stamps: Arc<StampSource>,
}

impl SampleStore {
    /// Open (or create) the database file and make sure the table exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_READINGS).execute(&pool).await?;

        let newest = newest_stamp(&pool).await?;
        tracing::debug!(
            path = %path.as_ref().display(),
            newest = ?newest,
            "sample store ready"
        );

        Ok(Self {
            pool,
            stamps: Arc::new(StampSource::starting_after(newest)),
        })
    }

    /// Observation time for a reading taken now. Never earlier than any
    /// stamp already stored in this database.
    pub fn next_stamp(&self) -> OffsetDateTime {
        self.stamps.now()
    }

    pub async fn append(&self, reading: &Reading) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO vessel_readings (device_id, level, timestamp)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(i64::from(reading.device.get()))
        .bind(reading.value)
        .bind(format_stamp(reading.observed_at)?)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    /// Level of the newest reading for `device`, if any.
    pub async fn latest(&self, device: DeviceAddress) -> Result<Option<i64>> {
        Ok(self
            .latest_reading(device)
            .await?
            .map(|reading| reading.value))
    }

    /// Newest reading for `device` with its observation time.
    pub async fn latest_reading(&self, device: DeviceAddress) -> Result<Option<Reading>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT level, timestamp FROM vessel_readings
            WHERE device_id = $1
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(i64::from(device.get()))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(level, stamp)| Ok(Reading::new(device, level, parse_stamp(&stamp)?)))
            .transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vessel_readings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_for(&self, device: DeviceAddress) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM vessel_readings WHERE device_id = $1")
                .bind(i64::from(device.get()))
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Hands out observation times that never go backwards.
#[derive(Debug)]
pub struct StampSource {
    last: Mutex<Option<OffsetDateTime>>,
}

impl StampSource {
    /// A source whose first stamp is not earlier than `floor`.
    pub fn starting_after(floor: Option<OffsetDateTime>) -> Self {
        Self {
            last: Mutex::new(floor),
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        // Stored text carries microseconds; drop the rest so stamps compare equal after a round trip.
        let now = now
            .replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
            .unwrap_or(now);
        match self.last.lock() {
            Ok(mut last) => {
                let stamp = match *last {
                    Some(prev) if prev > now => prev,
                    _ => now,
                };
                *last = Some(stamp);
                stamp
            }
            Err(_) => now,
        }
    }
}

async fn newest_stamp(pool: &SqlitePool) -> Result<Option<OffsetDateTime>> {
    let (raw,): (Option<String>,) = sqlx::query_as("SELECT MAX(timestamp) FROM vessel_readings")
        .fetch_one(pool)
        .await?;
    Ok(raw.as_deref().and_then(|raw| match parse_stamp(raw) {
        Ok(stamp) => Some(stamp),
        Err(err) => {
            tracing::warn!("ignoring newest stored timestamp: {err}");
            None
        }
    }))
}

/// Fixed-width UTC text, so ordering by the column orders by time.
fn format_stamp(at: OffsetDateTime) -> Result<String> {
    at.to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
        ))
        .map_err(|e| Error::Malformed(format!("unformattable timestamp: {e}")))
}

fn parse_stamp(raw: &str) -> Result<OffsetDateTime> {
    PrimitiveDateTime::parse(
        raw,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    )
    .map(PrimitiveDateTime::assume_utc)
    .map_err(|e| Error::Malformed(format!("stored timestamp '{raw}' is malformed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(raw: u8) -> DeviceAddress {
        DeviceAddress::new(raw).unwrap()
    }

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    async fn open_temp() -> (tempfile::TempDir, SampleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path().join("readings.db"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn latest_is_absent_for_unseen_device() {
        let (_dir, store) = open_temp().await;
        assert_eq!(store.latest(addr(1)).await.unwrap(), None);
        assert!(store.latest_reading(addr(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_picks_newest_timestamp() {
        let (_dir, store) = open_temp().await;
        store.append(&Reading::new(addr(1), 40, at(10))).await.unwrap();
        store.append(&Reading::new(addr(1), 55, at(20))).await.unwrap();
        assert_eq!(store.latest(addr(1)).await.unwrap(), Some(55));
    }

    #[tokio::test]
    async fn latest_ignores_insert_order_of_other_devices() {
        let (_dir, store) = open_temp().await;
        store.append(&Reading::new(addr(2), 7, at(30))).await.unwrap();
        store.append(&Reading::new(addr(1), 12, at(5))).await.unwrap();
        store.append(&Reading::new(addr(2), 9, at(31))).await.unwrap();
        store.append(&Reading::new(addr(1), 13, at(6))).await.unwrap();
        assert_eq!(store.latest(addr(1)).await.unwrap(), Some(13));
        assert_eq!(store.latest(addr(2)).await.unwrap(), Some(9));
        assert_eq!(store.count().await.unwrap(), 4);
        assert_eq!(store.count_for(addr(2)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn equal_timestamps_resolve_to_last_insert() {
        let (_dir, store) = open_temp().await;
        store.append(&Reading::new(addr(4), 1, at(50))).await.unwrap();
        store.append(&Reading::new(addr(4), 2, at(50))).await.unwrap();
        assert_eq!(store.latest(addr(4)).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn values_are_stored_unclamped() {
        let (_dir, store) = open_temp().await;
        store.append(&Reading::new(addr(3), 4_321, at(1))).await.unwrap();
        let reading = store.latest_reading(addr(3)).await.unwrap().unwrap();
        assert_eq!(reading.value, 4_321);
        assert_eq!(reading.observed_at, at(1));
    }

    #[tokio::test]
    async fn reopening_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");
        let store = SampleStore::open(&path).await.unwrap();
        store.append(&Reading::new(addr(1), 66, at(100))).await.unwrap();
        store.close().await;

        let reopened = SampleStore::open(&path).await.unwrap();
        assert_eq!(reopened.latest(addr(1)).await.unwrap(), Some(66));
    }

    #[test]
    fn stamps_never_go_backwards() {
        let source = StampSource::starting_after(None);
        let mut prev = source.now();
        for _ in 0..1_000 {
            let next = source.now();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn seeded_source_starts_at_floor() {
        let floor = OffsetDateTime::now_utc() + time::Duration::hours(1);
        let floor = floor.replace_nanosecond(0).unwrap();
        let source = StampSource::starting_after(Some(floor));
        assert_eq!(source.now(), floor);
    }

    #[tokio::test]
    async fn reopened_store_stamps_after_newest_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");
        let ahead = (OffsetDateTime::now_utc() + time::Duration::days(1))
            .replace_nanosecond(0)
            .unwrap();
        let store = SampleStore::open(&path).await.unwrap();
        store.append(&Reading::new(addr(1), 5, ahead)).await.unwrap();
        store.close().await;

        let reopened = SampleStore::open(&path).await.unwrap();
        let stamp = reopened.next_stamp();
        assert!(stamp >= ahead);
        reopened
            .append(&Reading::new(addr(1), 6, stamp))
            .await
            .unwrap();
        assert_eq!(reopened.latest(addr(1)).await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn clones_share_one_stamp_sequence() {
        let (_dir, store) = open_temp().await;
        let other = store.clone();
        let first = store.next_stamp();
        assert!(other.next_stamp() >= first);
    }

    #[test]
    fn stamp_text_sorts_like_time() {
        let early = format_stamp(at(9)).unwrap();
        let late = format_stamp(at(10)).unwrap();
        assert_eq!(early, "1970-01-01 00:00:09.000000");
        assert!(early < late);
        assert_eq!(parse_stamp(&late).unwrap(), at(10));
    }
}
