use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObiScore {
    pub year: i32,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryScore {
    pub code: String,
    pub country: String,
    /// Always ascending by year.
    pub obi_scores: Vec<ObiScore>,
}
