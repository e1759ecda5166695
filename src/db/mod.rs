mod countries;
mod fingerprints;
mod schema;
mod store;
mod users;

pub use countries::CountryScoreStore;
pub use fingerprints::FingerprintStore;
pub use store::{Store, DEFAULT_QUERY_TIMEOUT};
pub use users::UserStore;
