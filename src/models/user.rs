use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub name: Option<String>,
    pub locale: Option<String>,
    /// Stored as "<code> - <Country Name>", e.g. "IS - Iceland".
    pub country: Option<String>,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub sites: Vec<Site>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub url: Option<String>,
    pub title: String,
    pub search_dates: SearchDates,
    pub last_change: Option<DateTime<Utc>>,
}

/// The grace window during which a followed site triggers reminders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDates {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// A user with the sites that are inside their grace window today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remindee {
    pub email: String,
    pub name: Option<String>,
    pub locale: Option<String>,
    pub sites: Vec<ReminderSite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReminderSite {
    pub title: String,
    pub date: NaiveDate,
}

/// Field filter for user listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFilter {
    pub admin: Option<bool>,
    pub mute: Option<bool>,
    pub site_url: Option<String>,
    pub country: Option<String>,
    pub locale: Option<String>,
}

impl UserFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admin(mut self, admin: bool) -> Self {
        self.admin = Some(admin);
        self
    }

    pub fn muted(mut self, mute: bool) -> Self {
        self.mute = Some(mute);
        self
    }

    pub fn following(mut self, url: impl Into<String>) -> Self {
        self.site_url = Some(url.into());
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    #[cfg(test)]
    pub(crate) fn matches(&self, user: &User) -> bool {
        self.admin.map_or(true, |admin| user.admin == admin)
            && self.mute.map_or(true, |mute| user.mute == mute)
            && self.site_url.as_ref().map_or(true, |url| {
                user.sites.iter().any(|s| s.url.as_deref() == Some(url.as_str()))
            })
            && self
                .country
                .as_ref()
                .map_or(true, |c| user.country.as_deref() == Some(c.as_str()))
            && self
                .locale
                .as_ref()
                .map_or(true, |l| user.locale.as_deref() == Some(l.as_str()))
    }
}

/// Extract the display name from a "<code> - <Country Name>" attribute.
pub fn country_name(raw: &str) -> Result<&str> {
    raw.split(" - ")
        .nth(1)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            AppError::MalformedRecord(format!("country '{raw}' is not of the form 'CODE - Name'"))
        })
}
