use rusqlite::{params, OptionalExtension};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::{CountryScore, ObiScore};

use super::store::Store;

/// OBI score history per country.
#[derive(Clone)]
pub struct CountryScoreStore {
    store: Store,
}

impl CountryScoreStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Replace the score series of (code, country) with `scores`, sorted by
    /// year. Years missing from `scores` are dropped from the stored series.
    pub async fn update_scores(&self, code: &str, country: &str, scores: &[ObiScore]) -> Result<()> {
        if code.trim().is_empty() || country.trim().is_empty() {
            return Err(AppError::Validation(
                "country code and name are required".to_string(),
            ));
        }

        if let Some(bad) = scores.iter().find(|s| !s.score.is_finite()) {
            return Err(AppError::Validation(format!(
                "score for {code} - {country} in {} is not a finite number",
                bad.year
            )));
        }

        let mut sorted = scores.to_vec();
        sorted.sort_by_key(|s| s.year);
        let json = serde_json::to_string(&sorted)?;

        let (code, country) = (code.to_string(), country.to_string());
        let years = sorted.len();
        self.store
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO countries (code, country, obi_scores) VALUES (?1, ?2, ?3)
                       ON CONFLICT(code, country) DO UPDATE SET obi_scores = excluded.obi_scores"#,
                    params![code, country, json],
                )?;
                Ok(())
            })
            .await?;

        debug!(years, "updated country scores");
        Ok(())
    }

    pub async fn scores(&self, code: &str, country: &str) -> Result<Option<CountryScore>> {
        let (code, country) = (code.to_string(), country.to_string());
        let row = self
            .store
            .call(move |conn| {
                let json = conn
                    .query_row(
                        "SELECT obi_scores FROM countries WHERE code = ?1 AND country = ?2",
                        params![code, country],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(json.map(|json| (code, country, json)))
            })
            .await?;

        row.map(|(code, country, json)| score_from_parts(code, country, &json))
            .transpose()
    }

    pub async fn all(&self) -> Result<Vec<CountryScore>> {
        let rows = self
            .store
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT code, country, obi_scores FROM countries ORDER BY country, code")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(code, country, json)| score_from_parts(code, country, &json))
            .collect()
    }
}

fn score_from_parts(code: String, country: String, json: &str) -> Result<CountryScore> {
    let obi_scores: Vec<ObiScore> = serde_json::from_str(json).map_err(|e| {
        AppError::MalformedRecord(format!("obi_scores for {code} - {country}: {e}"))
    })?;
    Ok(CountryScore {
        code,
        country,
        obi_scores,
    })
}
