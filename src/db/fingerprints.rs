use std::collections::{HashMap, HashSet};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::FingerprintRecord;

use super::store::Store;

/// Latest known checksum for every (site, url) pair.
#[derive(Clone)]
pub struct FingerprintStore {
    store: Store,
}

impl FingerprintStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Every checksum recorded under each site, across all of its urls.
    pub async fn all(&self) -> Result<HashMap<String, HashSet<String>>> {
        let rows = self
            .store
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT site, checksum FROM checksums")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut sites: HashMap<String, HashSet<String>> = HashMap::new();
        for (site, checksum) in rows {
            sites.entry(site).or_default().insert(checksum);
        }
        Ok(sites)
    }

    /// Store `checksum` for (site, url) and hand back the record it replaced.
    ///
    /// `None` means the url had never been seen before. Comparing the old
    /// checksum against the new one tells a change from a repeat, see
    /// [`crate::models::Change::classify`].
    pub async fn update(
        &self,
        site: &str,
        url: &str,
        checksum: &str,
    ) -> Result<Option<FingerprintRecord>> {
        require("site", site)?;
        require("url", url)?;
        require("checksum", checksum)?;

        let (site, url, checksum) = (site.to_string(), url.to_string(), checksum.to_string());
        let previous = self
            .store
            .call(move |conn| {
                let tx = conn.transaction()?;
                let previous = tx
                    .query_row(
                        "SELECT checksum FROM checksums WHERE site = ?1 AND url = ?2",
                        params![site, url],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                tx.execute(
                    r#"INSERT INTO checksums (site, url, checksum) VALUES (?1, ?2, ?3)
                       ON CONFLICT(site, url) DO UPDATE SET checksum = excluded.checksum"#,
                    params![site, url, checksum],
                )?;
                tx.commit()?;
                Ok(previous.map(|checksum| FingerprintRecord {
                    site,
                    url,
                    checksum,
                }))
            })
            .await?;

        Ok(previous)
    }

    /// Delete the records of `site` whose checksum is one of `checksums`.
    pub async fn remove<I, S>(&self, site: &str, checksums: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let checksums: Vec<Value> = checksums
            .into_iter()
            .map(|c| Value::Text(c.into()))
            .collect();
        if checksums.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; checksums.len()].join(", ");
        let sql = format!("DELETE FROM checksums WHERE site = ? AND checksum IN ({placeholders})");
        let mut values = Vec::with_capacity(checksums.len() + 1);
        values.push(Value::Text(site.to_string()));
        values.extend(checksums);

        let removed = self
            .store
            .call(move |conn| Ok(conn.execute(&sql, params_from_iter(values.iter()))?))
            .await?;

        debug!(site, removed, "removed stale checksums");
        Ok(removed)
    }

    /// Delete everything recorded for a site that is no longer followed.
    pub async fn remove_site(&self, site: &str) -> Result<usize> {
        let owned = site.to_string();
        let removed = self
            .store
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM checksums WHERE site = ?1", params![owned])?)
            })
            .await?;

        debug!(site, removed, "removed site checksums");
        Ok(removed)
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Change;
    use std::time::Duration;

    const SITE: &str = "http://budget.example";

    async fn store() -> FingerprintStore {
        FingerprintStore::new(Store::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn update_reports_previous_checksum() {
        let fingerprints = store().await;
        let url = "http://budget.example/2024.csv";

        let first = fingerprints.update(SITE, url, "aaa").await.unwrap();
        assert!(first.is_none());
        assert_eq!(Change::classify(first.as_ref(), "aaa"), Change::New);

        let second = fingerprints.update(SITE, url, "bbb").await.unwrap();
        assert_eq!(
            second,
            Some(FingerprintRecord {
                site: SITE.to_string(),
                url: url.to_string(),
                checksum: "aaa".to_string(),
            })
        );
        assert_eq!(Change::classify(second.as_ref(), "bbb"), Change::Changed);

        let third = fingerprints.update(SITE, url, "bbb").await.unwrap();
        assert_eq!(Change::classify(third.as_ref(), "bbb"), Change::Unchanged);
    }

    #[tokio::test]
    async fn update_past_deadline_is_never_applied() {
        let shared = Store::open_in_memory().await.unwrap();
        let url = "http://budget.example/2024.csv";

        // Occupy the connection thread so the update has to queue
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let busy = shared.clone();
        let blocker = tokio::spawn(async move {
            busy.call(move |_| {
                let _ = started_tx.send(());
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
        });
        started_rx.await.unwrap();

        let hurried =
            FingerprintStore::new(shared.clone().with_query_timeout(Duration::from_millis(50)));
        let err = hurried.update(SITE, url, "new").await.err().unwrap();
        assert!(matches!(err, AppError::StoreUnavailable(_)));

        blocker.await.unwrap().unwrap();
        let fingerprints = FingerprintStore::new(shared);
        assert!(fingerprints.all().await.unwrap().is_empty());
        // A retry still sees the url as new
        assert!(fingerprints.update(SITE, url, "new").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_first_updates_see_one_new() {
        let fingerprints = store().await;
        let other = fingerprints.clone();
        let url = "http://budget.example/2024.csv";

        let (a, b) = tokio::join!(
            fingerprints.update(SITE, url, "a"),
            other.update(SITE, url, "b")
        );
        let results = [a.unwrap(), b.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
        assert_eq!(fingerprints.all().await.unwrap()[SITE].len(), 1);
    }

    #[tokio::test]
    async fn update_keeps_one_record_per_url() {
        let fingerprints = store().await;
        fingerprints.update(SITE, "http://budget.example/a", "1").await.unwrap();
        fingerprints.update(SITE, "http://budget.example/a", "2").await.unwrap();
        fingerprints.update(SITE, "http://budget.example/b", "3").await.unwrap();
        fingerprints
            .update("http://other.example", "http://other.example/a", "1")
            .await
            .unwrap();

        let all = fingerprints.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[SITE], HashSet::from(["2".to_string(), "3".to_string()]));
        assert_eq!(all["http://other.example"], HashSet::from(["1".to_string()]));
    }

    #[tokio::test]
    async fn all_groups_identical_checksums() {
        let fingerprints = store().await;
        fingerprints.update(SITE, "http://budget.example/a", "same").await.unwrap();
        fingerprints.update(SITE, "http://budget.example/b", "same").await.unwrap();

        let all = fingerprints.all().await.unwrap();
        assert_eq!(all[SITE].len(), 1);
    }

    #[tokio::test]
    async fn all_is_empty_for_empty_store() {
        assert!(store().await.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_requires_every_field() {
        let fingerprints = store().await;
        for (site, url, checksum) in [("", "u", "c"), ("s", " ", "c"), ("s", "u", "")] {
            assert!(matches!(
                fingerprints.update(site, url, checksum).await,
                Err(AppError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn remove_only_matching_checksums_of_site() {
        let fingerprints = store().await;
        fingerprints.update(SITE, "http://budget.example/a", "old").await.unwrap();
        fingerprints.update(SITE, "http://budget.example/b", "stale").await.unwrap();
        fingerprints.update(SITE, "http://budget.example/c", "fresh").await.unwrap();
        fingerprints
            .update("http://other.example", "http://other.example/a", "old")
            .await
            .unwrap();

        let removed = fingerprints.remove(SITE, ["old", "stale"]).await.unwrap();
        assert_eq!(removed, 2);

        let all = fingerprints.all().await.unwrap();
        assert_eq!(all[SITE], HashSet::from(["fresh".to_string()]));
        assert_eq!(all["http://other.example"], HashSet::from(["old".to_string()]));
    }

    #[tokio::test]
    async fn remove_without_matches_succeeds() {
        let fingerprints = store().await;
        fingerprints.update(SITE, "http://budget.example/a", "keep").await.unwrap();

        assert_eq!(fingerprints.remove(SITE, ["missing"]).await.unwrap(), 0);
        assert_eq!(fingerprints.remove(SITE, Vec::<String>::new()).await.unwrap(), 0);
        assert_eq!(fingerprints.all().await.unwrap()[SITE].len(), 1);
    }

    #[tokio::test]
    async fn remove_site_drops_every_url() {
        let fingerprints = store().await;
        fingerprints.update(SITE, "http://budget.example/a", "1").await.unwrap();
        fingerprints.update(SITE, "http://budget.example/b", "2").await.unwrap();

        assert_eq!(fingerprints.remove_site(SITE).await.unwrap(), 2);
        assert!(fingerprints.all().await.unwrap().is_empty());
        // Previous record is gone, so the next observation counts as new
        let again = fingerprints.update(SITE, "http://budget.example/a", "1").await.unwrap();
        assert!(again.is_none());
    }
}
