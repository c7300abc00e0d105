use chrono::Duration;
use num_format::{Locale, ToFormattedString};
use shared::{mrr, start_of_day};

use crate::{
    consts,
    db::types::{LeaderboardEntry, MrrLeaderboardEntry, StreakLeaderboardEntry},
    error::Result,
    Context,
};

impl Context {
    /// Members ranked by lifetime points. An empty board is a valid result.
    pub async fn all_time(&self, community_id: &str, limit: u32) -> Result<Vec<LeaderboardEntry>> {
        Ok(self.db.all_time_leaderboard(community_id, limit).await?)
    }

    /// Members ranked by points earned in the period that is active right now.
    pub async fn current_sprint(
        &self,
        community_id: &str,
        limit: u32,
    ) -> Result<Vec<LeaderboardEntry>> {
        Ok(self
            .db
            .current_sprint_leaderboard(community_id, self.now(), limit)
            .await?)
    }

    pub async fn streak_leaderboard(
        &self,
        community_id: &str,
        limit: u32,
    ) -> Result<Vec<StreakLeaderboardEntry>> {
        let yesterday = start_of_day(self.now()) - Duration::days(1);
        Ok(self
            .db
            .streak_leaderboard(community_id, yesterday, limit)
            .await?)
    }
}

fn place_marker(place: i64) -> String {
    usize::try_from(place - 1)
        .ok()
        .and_then(|index| consts::MEDALS.get(index))
        .map(|medal| medal.to_string())
        .unwrap_or_else(|| format!("{place}."))
}

pub fn format_leaderboard(title: &str, entries: &[LeaderboardEntry]) -> String {
    if entries.is_empty() {
        return format!("{title}\n\n{}", consts::EMPTY_LEADERBOARD);
    }

    let mut message = format!("{title}\n");
    for entry in entries {
        message.push_str(&format!(
            "\n{} {} - {} pts ({} goals completed)",
            place_marker(entry.place),
            entry.name(),
            entry.points.to_formatted_string(&Locale::en),
            entry.completed_goals
        ));
    }
    message
}

pub fn format_streak_leaderboard(entries: &[StreakLeaderboardEntry]) -> String {
    if entries.is_empty() {
        return format!("{}\n\n{}", consts::STREAK_TITLE, consts::EMPTY_STREAKS);
    }

    let mut message = format!("{}\n", consts::STREAK_TITLE);
    for entry in entries {
        message.push_str(&format!(
            "\n{} {} - {} days (best {}, {} check-ins)",
            place_marker(entry.place),
            entry.name(),
            entry.current_streak,
            entry.longest_streak,
            entry.total_check_ins.to_formatted_string(&Locale::en)
        ));
    }
    message
}

pub fn format_mrr_leaderboard(entries: &[MrrLeaderboardEntry]) -> String {
    if entries.is_empty() {
        return format!("{}\n\n{}", consts::MRR_TITLE, consts::EMPTY_MRR);
    }

    let mut message = format!("{}\n", consts::MRR_TITLE);
    for entry in entries {
        message.push_str(&format!(
            "\n{} {} - {}",
            place_marker(entry.place),
            entry.name(),
            mrr::format_amount(entry.amount_cents, &entry.currency)
        ));
    }
    message
}
