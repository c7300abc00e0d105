use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use shared::{ChallengeMultiplier, StreakState, WinCategory, Window};

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub account_id: String,
    pub community_id: String,
    pub display_name: Option<String>,
    pub total_points: i64,
    pub last_awarded_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl UserRecord {
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.account_id)
    }
}

#[derive(Debug, Clone, Default, sqlx::FromRow, Serialize, Deserialize)]
pub struct CommunityConfig {
    pub community_id: String,
    pub leaderboard_destination: Option<String>,
    pub reminder_destination: Option<String>,
    pub mrr_destination: Option<String>,
}

impl CommunityConfig {
    pub fn leaderboard_destination(&self) -> Option<&str> {
        non_empty(self.leaderboard_destination.as_deref())
    }

    pub fn reminder_destination(&self) -> Option<&str> {
        non_empty(self.reminder_destination.as_deref())
    }

    pub fn mrr_destination(&self) -> Option<&str> {
        non_empty(self.mrr_destination.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub id: i64,
    pub user_id: i64,
    pub account_id: String,
    pub display_name: Option<String>,
    pub community_id: String,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub leaderboard_finalized: bool,
    pub created_at: NaiveDateTime,
}

impl PeriodRecord {
    pub fn window(&self) -> Window {
        Window::new(self.start_date, self.end_date)
    }

    pub fn sprint(&self) -> SprintScope {
        SprintScope {
            period_id: self.id,
            window: self.window(),
        }
    }

    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.account_id)
    }
}

/// The period a point award counts towards, with the window cached on the
/// sprint row when it is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SprintScope {
    pub period_id: i64,
    pub window: Window,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct GoalRecord {
    pub id: i64,
    pub period_id: i64,
    pub position: i64,
    pub title: String,
    pub description: Option<String>,
    pub points: i64,
    pub completed: bool,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// A period together with its goals, ordered by position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusPeriod {
    pub period: PeriodRecord,
    pub goals: Vec<GoalRecord>,
}

impl FocusPeriod {
    pub fn completed_goals(&self) -> usize {
        self.goals.iter().filter(|goal| goal.completed).count()
    }

    pub fn pending_goals(&self) -> usize {
        self.goals.len() - self.completed_goals()
    }

    pub fn day_number(&self, now: NaiveDateTime) -> u32 {
        self.period.window().day_number(now)
    }

    pub fn days_remaining(&self, now: NaiveDateTime) -> u32 {
        self.period.window().days_remaining(now)
    }
}

/// Active period with goal counts, as read by the reminder sweeps.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PeriodSummary {
    #[sqlx(flatten)]
    pub period: PeriodRecord,
    pub total_goals: i64,
    pub completed_goals: i64,
}

impl PeriodSummary {
    pub fn pending_goals(&self) -> i64 {
        self.total_goals - self.completed_goals
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct StreakRecord {
    pub user_id: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub total_check_ins: i64,
    pub last_check_in: Option<NaiveDateTime>,
}

impl From<StreakRecord> for StreakState {
    fn from(record: StreakRecord) -> Self {
        Self {
            current: record.current_streak as u32,
            longest: record.longest_streak as u32,
            total_check_ins: record.total_check_ins as u32,
            last_check_in: record.last_check_in,
        }
    }
}

/// Free-form standup text attached to a check-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Standup {
    pub working_on: Option<String>,
    pub accomplished: Option<String>,
    pub blockers: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub place: i64,
    pub user_id: i64,
    pub account_id: String,
    pub display_name: Option<String>,
    pub points: i64,
    pub completed_goals: i64,
    pub last_awarded_at: Option<NaiveDateTime>,
}

impl LeaderboardEntry {
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.account_id)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct StreakLeaderboardEntry {
    pub place: i64,
    pub user_id: i64,
    pub account_id: String,
    pub display_name: Option<String>,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub total_check_ins: i64,
    pub last_check_in: Option<NaiveDateTime>,
}

impl StreakLeaderboardEntry {
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.account_id)
    }
}

/// Member with an active period who has not checked in today.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct AbsentMember {
    pub user_id: i64,
    pub account_id: String,
    pub display_name: Option<String>,
    pub community_id: String,
    pub current_streak: i64,
}

impl AbsentMember {
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.account_id)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct WinRecord {
    pub id: i64,
    pub user_id: i64,
    pub account_id: String,
    pub display_name: Option<String>,
    pub message: String,
    pub category: String,
    pub created_at: NaiveDateTime,
}

impl WinRecord {
    pub fn category(&self) -> WinCategory {
        WinCategory::parse_lenient(Some(&self.category))
    }

    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.account_id)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, strum::Display,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChallengeStatus {
    Active,
    Completed,
    Failed,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, strum::Display,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParticipantStatus {
    Active,
    Submitted,
    Completed,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub id: i64,
    pub community_id: String,
    pub creator_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub multiplier: f64,
    pub status: ChallengeStatus,
    pub created_at: NaiveDateTime,
}

impl ChallengeRecord {
    pub fn window(&self) -> Window {
        Window::new(self.start_date, self.end_date)
    }

    pub fn multiplier(&self) -> ChallengeMultiplier {
        ChallengeMultiplier::new(self.multiplier)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub challenge_id: i64,
    pub user_id: i64,
    pub account_id: String,
    pub status: ParticipantStatus,
    pub submitted_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct MrrEntryRecord {
    pub id: i64,
    pub user_id: i64,
    pub account_id: String,
    pub display_name: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub note: Option<String>,
    pub recorded_at: NaiveDateTime,
}

impl MrrEntryRecord {
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.account_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct MrrSettingsRecord {
    pub user_id: i64,
    pub is_public: bool,
    pub last_milestone_cents: i64,
}

/// Aggregates over every entry of one member.
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct MrrTotals {
    pub peak_cents: Option<i64>,
    pub entries: i64,
    pub first_recorded_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct MrrLeaderboardEntry {
    pub place: i64,
    pub user_id: i64,
    pub account_id: String,
    pub display_name: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub recorded_at: NaiveDateTime,
}

impl MrrLeaderboardEntry {
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.account_id)
    }
}
