use serde::{Deserialize, Serialize};

mod clock;
mod estimator;
pub mod mrr;
mod period;
mod streak;

#[cfg(feature = "client")]
pub mod openai;

#[cfg(feature = "client")]
pub mod telegram;

pub use clock::*;
pub use estimator::*;
pub use period::*;
pub use streak::*;

/// External chat account identifier, e.g. a Telegram user id.
pub type AccountId = String;
pub type CommunityId = String;
pub type Points = u32;

/// Points credited for sharing a win.
pub const WIN_POINTS: Points = 2;

/// Points a validated challenge is worth before its multiplier.
pub const CHALLENGE_BASE_POINTS: Points = 10;
pub const DEFAULT_CHALLENGE_MULTIPLIER: f64 = 1.5;
pub const MAX_CHALLENGE_MULTIPLIER: f64 = 3.0;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum WinCategory {
    Revenue,
    Product,
    Marketing,
    Customer,
    #[default]
    Other,
}

impl WinCategory {
    /// Unknown or missing categories are filed under [`WinCategory::Other`].
    pub fn parse_lenient(category: Option<&str>) -> Self {
        category
            .and_then(|category| category.trim().parse().ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChallengeMultiplier(f64);

impl ChallengeMultiplier {
    /// Non-positive multipliers fall back to the default, large ones are capped.
    pub fn new(value: f64) -> Self {
        if !(value > 0.0) {
            Self(DEFAULT_CHALLENGE_MULTIPLIER)
        } else {
            Self(value.min(MAX_CHALLENGE_MULTIPLIER))
        }
    }

    pub const fn value(&self) -> f64 {
        self.0
    }

    pub fn reward(&self) -> Points {
        (CHALLENGE_BASE_POINTS as f64 * self.0).floor() as Points
    }
}

impl Default for ChallengeMultiplier {
    fn default() -> Self {
        Self(DEFAULT_CHALLENGE_MULTIPLIER)
    }
}
