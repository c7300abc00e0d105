use chrono::NaiveDateTime;
use focus_sprints_server::db::types::{
    FocusPeriod, GoalRecord, LeaderboardEntry, MrrLeaderboardEntry, StreakLeaderboardEntry,
    UserRecord,
};
use serde::{Deserialize, Serialize};
use shared::StreakState;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub place: u32,
    pub account_id: String,
    pub name: String,
    pub points: u64,
    pub completed_goals: u32,
}

impl From<LeaderboardEntry> for LeaderboardResponse {
    fn from(entry: LeaderboardEntry) -> Self {
        Self {
            place: entry.place as u32,
            name: entry.name().to_string(),
            account_id: entry.account_id,
            points: entry.points as u64,
            completed_goals: entry.completed_goals as u32,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreakLeaderboardResponse {
    pub place: u32,
    pub account_id: String,
    pub name: String,
    pub current: u32,
    pub longest: u32,
    pub total_check_ins: u32,
}

impl From<StreakLeaderboardEntry> for StreakLeaderboardResponse {
    fn from(entry: StreakLeaderboardEntry) -> Self {
        Self {
            place: entry.place as u32,
            name: entry.name().to_string(),
            account_id: entry.account_id,
            current: entry.current_streak as u32,
            longest: entry.longest_streak as u32,
            total_check_ins: entry.total_check_ins as u32,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MrrLeaderboardResponse {
    pub place: u32,
    pub account_id: String,
    pub name: String,
    pub amount_cents: i64,
    pub currency: String,
}

impl From<MrrLeaderboardEntry> for MrrLeaderboardResponse {
    fn from(entry: MrrLeaderboardEntry) -> Self {
        Self {
            place: entry.place as u32,
            name: entry.name().to_string(),
            account_id: entry.account_id,
            amount_cents: entry.amount_cents,
            currency: entry.currency,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GoalResponse {
    pub position: u32,
    pub title: String,
    pub points: u32,
    pub completed: bool,
    pub completed_at: Option<NaiveDateTime>,
}

impl From<GoalRecord> for GoalResponse {
    fn from(goal: GoalRecord) -> Self {
        Self {
            position: goal.position as u32,
            title: goal.title,
            points: goal.points as u32,
            completed: goal.completed,
            completed_at: goal.completed_at,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeriodResponse {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub day: u32,
    pub days_remaining: u32,
    pub goals: Vec<GoalResponse>,
}

impl PeriodResponse {
    pub fn new(period: FocusPeriod, now: NaiveDateTime) -> Self {
        Self {
            start: period.period.start_date,
            end: period.period.end_date,
            day: period.day_number(now),
            days_remaining: period.days_remaining(now),
            goals: period.goals.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserProfile {
    pub account_id: String,
    pub name: String,
    pub total_points: u64,
    pub streak: StreakState,
    pub active_period: Option<PeriodResponse>,
}

impl UserProfile {
    pub fn new(user: UserRecord, streak: StreakState, active_period: Option<PeriodResponse>) -> Self {
        Self {
            name: user.name().to_string(),
            account_id: user.account_id,
            total_points: user.total_points as u64,
            streak,
            active_period,
        }
    }
}
