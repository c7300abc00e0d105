use chrono::NaiveDateTime;
use tracing::instrument;

use super::{
    types::{LeaderboardEntry, StreakLeaderboardEntry},
    DB,
};

impl DB {
    /// Lifetime totals. Ties go to whoever reached their total first.
    #[instrument(skip(self))]
    pub async fn all_time_leaderboard(
        &self,
        community_id: &str,
        limit: u32,
    ) -> sqlx::Result<Vec<LeaderboardEntry>> {
        sqlx::query_as(
            r#"
            SELECT ROW_NUMBER() OVER (
                       ORDER BY u.total_points DESC, u.last_awarded_at ASC, u.id ASC
                   ) AS place,
                   u.id AS user_id, u.account_id, u.display_name,
                   u.total_points AS points,
                   (
                       SELECT COUNT(*)
                       FROM goals g
                       JOIN periods p ON p.id = g.period_id
                       WHERE p.user_id = u.id AND g.completed = TRUE
                   ) AS completed_goals,
                   u.last_awarded_at
            FROM users u
            WHERE u.community_id = $1 AND u.total_points > 0
            ORDER BY place
            LIMIT $2
            "#,
        )
        .bind(community_id)
        .bind(limit as i64)
        .fetch_all(&self.0)
        .await
    }

    /// Sprint subtotals whose cached window contains `now`.
    #[instrument(skip(self))]
    pub async fn current_sprint_leaderboard(
        &self,
        community_id: &str,
        now: NaiveDateTime,
        limit: u32,
    ) -> sqlx::Result<Vec<LeaderboardEntry>> {
        sqlx::query_as(
            r#"
            SELECT ROW_NUMBER() OVER (
                       ORDER BY sp.points DESC, sp.last_awarded_at ASC, u.id ASC
                   ) AS place,
                   u.id AS user_id, u.account_id, u.display_name,
                   sp.points,
                   (
                       SELECT COUNT(*)
                       FROM goals g
                       WHERE g.period_id = sp.period_id AND g.completed = TRUE
                   ) AS completed_goals,
                   sp.last_awarded_at
            FROM sprint_points sp
            JOIN users u ON u.id = sp.user_id
            WHERE sp.community_id = $1
              AND sp.window_start <= $2 AND $2 < sp.window_end
              AND sp.points > 0
            ORDER BY place
            LIMIT $3
            "#,
        )
        .bind(community_id)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.0)
        .await
    }

    /// Sprint subtotals of the periods that ended and still wait for their
    /// leaderboard post, summed per member.
    #[instrument(skip(self))]
    pub async fn ended_sprint_leaderboard(
        &self,
        community_id: &str,
        now: NaiveDateTime,
        limit: u32,
    ) -> sqlx::Result<Vec<LeaderboardEntry>> {
        sqlx::query_as(
            r#"
            WITH ended AS (
                SELECT id, user_id
                FROM periods
                WHERE community_id = $1 AND end_date <= $2 AND leaderboard_finalized = FALSE
            ),
            totals AS (
                SELECT sp.user_id,
                       SUM(sp.points) AS points,
                       MAX(sp.last_awarded_at) AS last_awarded_at
                FROM sprint_points sp
                WHERE sp.period_id IN (SELECT id FROM ended)
                GROUP BY sp.user_id
            )
            SELECT ROW_NUMBER() OVER (
                       ORDER BY t.points DESC, t.last_awarded_at ASC, u.id ASC
                   ) AS place,
                   u.id AS user_id, u.account_id, u.display_name,
                   t.points,
                   (
                       SELECT COUNT(*)
                       FROM goals g
                       JOIN ended e ON e.id = g.period_id
                       WHERE e.user_id = u.id AND g.completed = TRUE
                   ) AS completed_goals,
                   t.last_awarded_at
            FROM totals t
            JOIN users u ON u.id = t.user_id
            WHERE t.points > 0
            ORDER BY place
            LIMIT $3
            "#,
        )
        .bind(community_id)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.0)
        .await
    }

    /// Live streaks only: the last check-in has to be on or after
    /// `yesterday`, otherwise the streak is already broken.
    #[instrument(skip(self))]
    pub async fn streak_leaderboard(
        &self,
        community_id: &str,
        yesterday: NaiveDateTime,
        limit: u32,
    ) -> sqlx::Result<Vec<StreakLeaderboardEntry>> {
        sqlx::query_as(
            r#"
            SELECT ROW_NUMBER() OVER (
                       ORDER BY s.current_streak DESC, s.total_check_ins DESC, u.id ASC
                   ) AS place,
                   u.id AS user_id, u.account_id, u.display_name,
                   s.current_streak, s.longest_streak, s.total_check_ins, s.last_check_in
            FROM streaks s
            JOIN users u ON u.id = s.user_id
            WHERE u.community_id = $1
              AND s.current_streak > 0
              AND s.last_check_in >= $2
            ORDER BY place
            LIMIT $3
            "#,
        )
        .bind(community_id)
        .bind(yesterday)
        .bind(limit as i64)
        .fetch_all(&self.0)
        .await
    }
}
