use async_trait::async_trait;

use super::*;

/// Points a goal gets whenever its difficulty cannot be estimated.
pub const DEFAULT_GOAL_POINTS: Points = 5;
pub const MIN_GOAL_POINTS: Points = 1;
pub const MAX_GOAL_POINTS: Points = 10;

#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    #[error("estimator is not configured")]
    NotConfigured,
    #[error("estimator timed out")]
    Timeout,
    #[error("estimator request failed: {0}")]
    Http(String),
    #[error("could not read points from {0:?}")]
    Unparseable(String),
}

/// Rates how hard a goal is on a 1 to 10 scale.
#[async_trait]
pub trait Estimator: Send + Sync {
    async fn estimate(&self, title: &str, description: Option<&str>)
        -> Result<Points, EstimateError>;
}

/// Used when no estimation backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl Estimator for Unconfigured {
    async fn estimate(&self, _: &str, _: Option<&str>) -> Result<Points, EstimateError> {
        Err(EstimateError::NotConfigured)
    }
}

/// Reads the first run of digits in a free-form reply and clamps it into
/// the `[MIN_GOAL_POINTS, MAX_GOAL_POINTS]` range.
pub fn parse_points(reply: &str) -> Result<Points, EstimateError> {
    let digits: String = reply
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();

    if digits.is_empty() {
        return Err(EstimateError::Unparseable(reply.to_string()));
    }

    // A run of digits too long for u32 is still "a lot of work".
    let points = digits.parse::<u64>().unwrap_or(u64::MAX);
    Ok(points.clamp(MIN_GOAL_POINTS as u64, MAX_GOAL_POINTS as u64) as Points)
}

/// Collapses any estimation failure into [`DEFAULT_GOAL_POINTS`].
pub fn points_or_default(title: &str, estimate: Result<Points, EstimateError>) -> Points {
    match estimate {
        Ok(points) => points.clamp(MIN_GOAL_POINTS, MAX_GOAL_POINTS),
        Err(EstimateError::NotConfigured) => DEFAULT_GOAL_POINTS,
        Err(e) => {
            tracing::warn!("Falling back to default points for goal {title:?}: {e}");
            DEFAULT_GOAL_POINTS
        }
    }
}
