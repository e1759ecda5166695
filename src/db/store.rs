use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::InterruptHandle;
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};

use super::schema::SCHEMA;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Shared handle to the document store. Clone is cheap; every clone talks to
/// the same background connection.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
    interrupt: Arc<InterruptHandle>,
    query_timeout: Duration,
}

/// Where a queued call is, as seen by both the caller and the connection thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Queued,
    Running,
    Finished,
    Abandoned,
}

impl Store {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        debug!(path = %path.display(), "opening store");
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::open(&config.db_path)
            .await?
            .with_query_timeout(config.query_timeout()))
    }

    async fn init(conn: Connection) -> Result<Self> {
        let interrupt = conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(conn.get_interrupt_handle())
            })
            .await?;

        info!("store schema ready");
        Ok(Self {
            conn,
            interrupt: Arc::new(interrupt),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        })
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Run `function` on the connection thread, bounded by the query timeout.
    /// The closure is the unit of atomicity: it commits fully or not at all.
    ///
    /// When the deadline passes before the closure starts, it is abandoned and
    /// will never run. When it is already running, its statements are
    /// interrupted and the call reports whatever the closure really did, so an
    /// error never hides a committed write.
    pub(crate) async fn call<F, R>(&self, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let state = Arc::new(Mutex::new(CallState::Queued));
        let guard = Arc::clone(&state);
        let call = self.conn.call(move |conn| {
            {
                let mut state = lock(&guard);
                if *state == CallState::Abandoned {
                    return Err(rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
                        Some("deadline elapsed before the query started".to_string()),
                    )
                    .into());
                }
                *state = CallState::Running;
            }
            let result = function(conn);
            *lock(&guard) = CallState::Finished;
            result
        });
        tokio::pin!(call);

        match tokio::time::timeout(self.query_timeout, &mut call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                {
                    let mut current = lock(&state);
                    match *current {
                        CallState::Queued => {
                            *current = CallState::Abandoned;
                            warn!(timeout = ?self.query_timeout, "abandoned queued query");
                            return Err(self.deadline_elapsed());
                        }
                        CallState::Running => {
                            warn!(timeout = ?self.query_timeout, "interrupting running query");
                            self.interrupt.interrupt();
                        }
                        CallState::Finished | CallState::Abandoned => {}
                    }
                }
                match call.await {
                    Ok(value) => Ok(value),
                    Err(e) => match AppError::from(e) {
                        AppError::StoreUnavailable(_) => Err(self.deadline_elapsed()),
                        other => Err(other),
                    },
                }
            }
        }
    }

    fn deadline_elapsed(&self) -> AppError {
        AppError::StoreUnavailable(format!(
            "query did not finish within {:?}",
            self.query_timeout
        ))
    }
}

fn lock(state: &Mutex<CallState>) -> MutexGuard<'_, CallState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| AppError::MalformedRecord(format!("invalid date '{s}': {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    // RFC3339 is what we write; also accept SQLite's datetime('now') format
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| AppError::MalformedRecord(format!("invalid timestamp '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_on_disk_database_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beagle.db");

        Store::open(&path).await.unwrap();
        // Schema creation must be idempotent
        Store::open(&path).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn missing_parent_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("beagle.db");
        let err = Store::open(&path).await.err().unwrap();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn running_query_past_deadline_is_rolled_back() {
        let store = Store::open_in_memory()
            .await
            .unwrap()
            .with_query_timeout(Duration::from_millis(50));

        let result = store
            .call(|conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO checksums (site, url, checksum) VALUES ('s', 'u', 'c')",
                    [],
                )?;
                // Never terminates on its own
                tx.query_row(
                    "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT count(*) FROM n",
                    [],
                    |row| row.get::<_, i64>(0),
                )?;
                tx.commit()?;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AppError::StoreUnavailable(_))));

        let rows: i64 = store
            .call(|conn| Ok(conn.query_row("SELECT count(*) FROM checksums", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn query_within_deadline_returns_its_value() {
        let store = Store::open_in_memory()
            .await
            .unwrap()
            .with_query_timeout(Duration::from_secs(5));
        let answer: i64 = store
            .call(|conn| Ok(conn.query_row("SELECT 42", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(answer, 42);
    }

    #[test]
    fn parses_both_timestamp_formats() {
        let a = parse_datetime("2024-05-01T10:00:00+00:00").unwrap();
        let b = parse_datetime("2024-05-01 10:00:00").unwrap();
        assert_eq!(a, b);
        assert!(matches!(
            parse_datetime("yesterday"),
            Err(AppError::MalformedRecord(_))
        ));
    }

    #[test]
    fn dates_round_trip_through_text() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert_eq!(format_date(date), "2024-01-09");
        assert_eq!(parse_date("2024-01-09").unwrap(), date);
    }
}
