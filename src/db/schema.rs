pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- users table; username holds the user's email address
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY NOT NULL,
    name TEXT,
    locale TEXT,
    country TEXT,
    admin INTEGER NOT NULL DEFAULT 0,
    mute INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_users_mute ON users(mute);

-- user_sites table (ordered subscription list per user)
CREATE TABLE IF NOT EXISTS user_sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    url TEXT,
    title TEXT NOT NULL,
    search_start TEXT NOT NULL,
    search_end TEXT NOT NULL,
    last_change TEXT,
    UNIQUE(username, position)
);

CREATE INDEX IF NOT EXISTS idx_user_sites_url ON user_sites(url);
CREATE INDEX IF NOT EXISTS idx_user_sites_window ON user_sites(search_start, search_end);

-- checksums table (latest fingerprint per site/url)
CREATE TABLE IF NOT EXISTS checksums (
    site TEXT NOT NULL,
    url TEXT NOT NULL,
    checksum TEXT NOT NULL,
    PRIMARY KEY(site, url)
);

CREATE INDEX IF NOT EXISTS idx_checksums_site_checksum ON checksums(site, checksum);

-- countries table; obi_scores is a JSON array sorted by year
CREATE TABLE IF NOT EXISTS countries (
    code TEXT NOT NULL,
    country TEXT NOT NULL,
    obi_scores TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY(code, country)
);
"#;
