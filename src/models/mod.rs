mod country;
mod fingerprint;
mod user;

pub use country::{CountryScore, ObiScore};
pub use fingerprint::{Change, FingerprintRecord};
pub use user::{country_name, Remindee, ReminderSite, SearchDates, Site, User, UserFilter};
