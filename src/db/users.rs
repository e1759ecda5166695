use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::{country_name, Remindee, ReminderSite, SearchDates, Site, User, UserFilter};

use super::store::{format_date, parse_date, parse_datetime, Store};

/// Users and the sites they follow.
#[derive(Clone)]
pub struct UserStore {
    store: Store,
}

struct UserRow {
    username: String,
    name: Option<String>,
    locale: Option<String>,
    country: Option<String>,
    admin: bool,
    mute: bool,
    sites: Vec<SiteRow>,
}

struct SiteRow {
    url: Option<String>,
    title: String,
    search_start: String,
    search_end: String,
    last_change: Option<String>,
}

impl UserStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert or replace a user together with its full, ordered site list.
    pub async fn save(&self, user: &User) -> Result<()> {
        validate_user(user)?;

        let email = user.email.clone();
        let name = user.name.clone();
        let locale = user.locale.clone();
        let country = user.country.clone();
        let (admin, mute) = (user.admin, user.mute);
        let sites: Vec<SiteRow> = user.sites.iter().map(SiteRow::from_site).collect();
        let site_count = sites.len();

        self.store
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    r#"INSERT INTO users (username, name, locale, country, admin, mute)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                       ON CONFLICT(username) DO UPDATE SET
                           name = excluded.name,
                           locale = excluded.locale,
                           country = excluded.country,
                           admin = excluded.admin,
                           mute = excluded.mute"#,
                    params![email, name, locale, country, admin, mute],
                )?;
                tx.execute("DELETE FROM user_sites WHERE username = ?1", params![email])?;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT INTO user_sites
                               (username, position, url, title, search_start, search_end, last_change)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                    )?;
                    for (position, site) in sites.iter().enumerate() {
                        stmt.execute(params![
                            email,
                            position as i64,
                            site.url,
                            site.title,
                            site.search_start,
                            site.search_end,
                            site.last_change,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        debug!(email = %user.email, sites = site_count, "saved user");
        Ok(())
    }

    pub async fn get(&self, email: &str) -> Result<Option<User>> {
        let users = self
            .query_users(
                " WHERE u.username = ?".to_string(),
                vec![Value::Text(email.to_string())],
            )
            .await?;
        Ok(users.into_iter().next())
    }

    /// All users matching `filter`.
    pub async fn list_all(&self, filter: &UserFilter) -> Result<Vec<User>> {
        let (clause, values) = where_clause(filter);
        self.query_users(clause, values).await
    }

    /// Users who are neither admins nor muted.
    pub async fn list_normal(&self) -> Result<Vec<User>> {
        self.list_all(&UserFilter::new().admin(false).muted(false))
            .await
    }

    /// Distinct country names over every user with a country set.
    ///
    /// Countries are stored as "IS - Iceland"; only the name part is
    /// returned. A stored value without the separator is an error.
    pub async fn countries(&self) -> Result<BTreeSet<String>> {
        let raw = self
            .store
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT DISTINCT country FROM users WHERE country IS NOT NULL")?;
                let countries = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(countries)
            })
            .await?;

        raw.iter()
            .map(|c| country_name(c).map(str::to_string))
            .collect()
    }

    /// Users with at least one followed site inside its grace window today.
    pub async fn remindees(&self) -> Result<Vec<Remindee>> {
        self.remindees_on(Local::now().date_naive()).await
    }

    pub async fn remindees_on(&self, day: NaiveDate) -> Result<Vec<Remindee>> {
        let today = format_date(day);
        let rows = self
            .store
            .call(move |conn| {
                // Muted users out, one row per followed site, then the window.
                let mut stmt = conn.prepare(
                    r#"SELECT u.username, u.name, u.locale, s.title, s.search_start
                       FROM users u
                       JOIN user_sites s ON s.username = u.username
                       WHERE u.mute = 0
                         AND s.search_start <= ?1
                         AND s.search_end >= ?1
                       ORDER BY u.username, s.position"#,
                )?;
                let rows = stmt
                    .query_map(params![today], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut groups: BTreeMap<(String, Option<String>, Option<String>), BTreeSet<ReminderSite>> =
            BTreeMap::new();
        for (email, name, locale, title, start) in rows {
            let site = ReminderSite {
                title,
                date: parse_date(&start)?,
            };
            groups.entry((email, name, locale)).or_default().insert(site);
        }

        let remindees: Vec<Remindee> = groups
            .into_iter()
            .map(|((email, name, locale), sites)| Remindee {
                email,
                name,
                locale,
                sites: sites.into_iter().collect(),
            })
            .collect();

        info!(day = %day, count = remindees.len(), "computed remindees");
        Ok(remindees)
    }

    /// Every distinct site URL followed by a non-muted user.
    pub async fn urls(&self) -> Result<Vec<String>> {
        self.store
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT DISTINCT s.url
                       FROM users u
                       JOIN user_sites s ON s.username = u.username
                       WHERE u.mute = 0 AND s.url IS NOT NULL
                       ORDER BY s.url"#,
                )?;
                let urls = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(urls)
            })
            .await
    }

    /// Non-muted users following a site with exactly this URL.
    pub async fn have_url(&self, url: &str) -> Result<Vec<User>> {
        self.list_all(&UserFilter::new().following(url).muted(false))
            .await
    }

    /// Mark `site` as changed now for every non-muted follower.
    /// Returns how many subscriptions were updated.
    pub async fn touch(&self, site: &str) -> Result<usize> {
        self.touch_at(site, Utc::now()).await
    }

    async fn touch_at(&self, site: &str, at: DateTime<Utc>) -> Result<usize> {
        let url = site.to_string();
        let stamp = at.to_rfc3339();
        let touched = self
            .store
            .call(move |conn| {
                let n = conn.execute(
                    r#"UPDATE user_sites SET last_change = ?1
                       WHERE url = ?2
                         AND username IN (SELECT username FROM users WHERE mute = 0)"#,
                    params![stamp, url],
                )?;
                Ok(n)
            })
            .await?;

        debug!(site, touched, "touched site subscriptions");
        Ok(touched)
    }

    async fn query_users(&self, clause: String, values: Vec<Value>) -> Result<Vec<User>> {
        let rows = self
            .store
            .call(move |conn| {
                let sql = format!(
                    "SELECT u.username, u.name, u.locale, u.country, u.admin, u.mute FROM users u{clause} ORDER BY u.username"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut users = stmt
                    .query_map(params_from_iter(values.iter()), user_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let mut sites_stmt = conn.prepare(
                    r#"SELECT url, title, search_start, search_end, last_change
                       FROM user_sites WHERE username = ?1 ORDER BY position"#,
                )?;
                for user in users.iter_mut() {
                    user.sites = sites_stmt
                        .query_map(params![user.username], site_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                }
                Ok(users)
            })
            .await?;

        rows.into_iter().map(UserRow::into_user).collect()
    }
}

fn where_clause(filter: &UserFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(admin) = filter.admin {
        clauses.push("u.admin = ?");
        values.push(Value::Integer(admin as i64));
    }
    if let Some(mute) = filter.mute {
        clauses.push("u.mute = ?");
        values.push(Value::Integer(mute as i64));
    }
    if let Some(url) = &filter.site_url {
        clauses.push(
            "EXISTS (SELECT 1 FROM user_sites s WHERE s.username = u.username AND s.url = ?)",
        );
        values.push(Value::Text(url.clone()));
    }
    if let Some(country) = &filter.country {
        clauses.push("u.country = ?");
        values.push(Value::Text(country.clone()));
    }
    if let Some(locale) = &filter.locale {
        clauses.push("u.locale = ?");
        values.push(Value::Text(locale.clone()));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn validate_user(user: &User) -> Result<()> {
    if user.email.trim().is_empty() {
        return Err(AppError::Validation("user email is required".to_string()));
    }
    if let Some(site) = user.sites.iter().find(|s| s.title.trim().is_empty()) {
        return Err(AppError::Validation(format!(
            "site {:?} followed by {} has no title",
            site.url, user.email
        )));
    }
    for site in &user.sites {
        let SearchDates { start, end } = site.search_dates;
        // Window bounds are compared as YYYY-MM-DD text
        if [start, end].iter().any(|d| !(0..=9999).contains(&d.year())) {
            return Err(AppError::Validation(format!(
                "grace window {start}..{end} of '{}' is outside years 0000-9999",
                site.title
            )));
        }
    }
    Ok(())
}

fn user_from_row(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        username: row.get(0)?,
        name: row.get(1)?,
        locale: row.get(2)?,
        country: row.get(3)?,
        admin: row.get(4)?,
        mute: row.get(5)?,
        sites: Vec::new(),
    })
}

fn site_from_row(row: &Row) -> rusqlite::Result<SiteRow> {
    Ok(SiteRow {
        url: row.get(0)?,
        title: row.get(1)?,
        search_start: row.get(2)?,
        search_end: row.get(3)?,
        last_change: row.get(4)?,
    })
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        Ok(User {
            email: self.username,
            name: self.name,
            locale: self.locale,
            country: self.country,
            admin: self.admin,
            mute: self.mute,
            sites: self
                .sites
                .into_iter()
                .map(SiteRow::into_site)
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

impl SiteRow {
    fn from_site(site: &Site) -> Self {
        Self {
            url: site.url.clone(),
            title: site.title.clone(),
            search_start: format_date(site.search_dates.start),
            search_end: format_date(site.search_dates.end),
            last_change: site.last_change.map(|dt| dt.to_rfc3339()),
        }
    }

    fn into_site(self) -> Result<Site> {
        Ok(Site {
            url: self.url,
            title: self.title,
            search_dates: SearchDates {
                start: parse_date(&self.search_start)?,
                end: parse_date(&self.search_end)?,
            },
            last_change: self
                .last_change
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}
