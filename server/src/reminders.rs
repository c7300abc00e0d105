use itertools::Itertools;
use shared::{
    start_of_day, Window, FOCUS_PERIOD_DAYS, INSUFFICIENT_GOALS_DAYS, MINIMUM_GOALS,
};
use tracing::{debug, error, instrument};

use crate::{
    consts,
    db::types::{AbsentMember, PeriodSummary},
    error::Result,
    leaderboard,
    periods::FinalizeReport,
    Context,
};

impl Context {
    /// Lists members with pending goals on the reminder days of their period.
    /// Returns the number of messages posted.
    #[instrument(skip(self))]
    pub async fn daily_reminder_sweep(&self) -> Result<usize> {
        let now = self.now();
        let periods = self.db.active_period_summaries(None, now).await?;
        let due = periods
            .into_iter()
            .filter(|summary| summary.pending_goals() > 0)
            .filter(|summary| summary.period.window().is_reminder_day(now));

        self.post_reminders(due, consts::DAILY_REMINDER_TITLE, |summary| {
            format!(
                "• {} - day {}/{FOCUS_PERIOD_DAYS}, {} of {} goals pending, {} days left",
                summary.period.name(),
                summary.period.window().day_number(now),
                summary.pending_goals(),
                summary.total_goals,
                summary.period.window().days_remaining(now)
            )
        })
        .await
    }

    /// Nudges members that are still below the minimum goal count early in
    /// their period.
    #[instrument(skip(self))]
    pub async fn insufficient_goals_sweep(&self) -> Result<usize> {
        let now = self.now();
        let periods = self.db.active_period_summaries(None, now).await?;
        let due = periods
            .into_iter()
            .filter(|summary| (summary.total_goals as usize) < MINIMUM_GOALS)
            .filter(|summary| {
                INSUFFICIENT_GOALS_DAYS.contains(&summary.period.window().day_number(now))
            });

        self.post_reminders(due, consts::INSUFFICIENT_GOALS_TITLE, |summary| {
            format!(
                "• {} - {} of {MINIMUM_GOALS} goals set",
                summary.period.name(),
                summary.total_goals
            )
        })
        .await
    }

    /// Reminds members with an active period who have not checked in today.
    #[instrument(skip(self))]
    pub async fn streak_absence_sweep(&self) -> Result<usize> {
        let now = self.now();
        let absent = self
            .db
            .members_without_check_in(start_of_day(now), now)
            .await?;

        let mut posted = 0;
        let by_community = absent
            .into_iter()
            .into_group_map_by(|member| member.community_id.clone())
            .into_iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .collect::<Vec<(String, Vec<AbsentMember>)>>();
        for (community_id, members) in by_community {
            let config = self.db.community_config(&community_id).await?;
            let Some(destination) = config.reminder_destination() else {
                debug!("No reminder destination for {community_id}");
                continue;
            };

            let mut text = format!("{}\n", consts::STREAK_ABSENCE_TITLE);
            for member in &members {
                if member.current_streak > 0 {
                    text.push_str(&format!(
                        "\n• {} - {}-day streak on the line",
                        member.name(),
                        member.current_streak
                    ));
                } else {
                    text.push_str(&format!("\n• {}", member.name()));
                }
            }
            self.notifier.post(destination, text);
            posted += 1;
        }
        Ok(posted)
    }

    /// Finalizes ended periods in every community that has some pending.
    /// A community that fails is logged and counted, the rest still run.
    #[instrument(skip(self))]
    pub async fn sweep_all_ended_periods(&self) -> Result<FinalizeReport> {
        let communities = self.db.communities_with_ended_periods(self.now()).await?;
        let mut total = FinalizeReport::default();
        for community_id in communities {
            match self.sweep_ended_periods(&community_id).await {
                Ok(report) => {
                    total.finalized += report.finalized;
                    total.leaderboard_posted |= report.leaderboard_posted;
                }
                Err(e) => {
                    error!("Failed to sweep ended periods in {community_id}: {e}");
                    total.failed += 1;
                }
            }
        }
        Ok(total)
    }

    /// Last month's wins plus the all-time and MRR boards, per community
    /// with a leaderboard destination.
    #[instrument(skip(self))]
    pub async fn monthly_digest(&self) -> Result<usize> {
        let Some(month) = Window::previous_month(self.now()) else {
            return Ok(0);
        };

        let mut posted = 0;
        for config in self.db.community_configs().await? {
            let Some(destination) = config.leaderboard_destination() else {
                continue;
            };
            let wins = self
                .db
                .wins_between(&config.community_id, month, consts::DIGEST_WINS_LIMIT)
                .await?;
            let top = self
                .db
                .all_time_leaderboard(&config.community_id, consts::DIGEST_LEADERBOARD_LIMIT)
                .await?;
            let mrr = self
                .db
                .mrr_leaderboard(&config.community_id, consts::DIGEST_LEADERBOARD_LIMIT)
                .await?;
            if wins.is_empty() && top.is_empty() && mrr.is_empty() {
                continue;
            }

            let mut text = format!(
                "{} - {}\n",
                consts::MONTHLY_DIGEST_TITLE,
                month.start.format("%B %Y")
            );
            if !wins.is_empty() {
                text.push_str(&format!("\n{}\n", consts::DIGEST_WINS_TITLE));
                for win in &wins {
                    text.push_str(&format!(
                        "• [{}] {}: {}\n",
                        win.category(),
                        win.name(),
                        win.message
                    ));
                }
            }
            if !top.is_empty() {
                text.push('\n');
                text.push_str(&leaderboard::format_leaderboard(consts::DIGEST_TOP_TITLE, &top));
            }
            if !mrr.is_empty() {
                text.push_str("\n\n");
                text.push_str(&leaderboard::format_mrr_leaderboard(&mrr));
            }
            self.notifier.post(destination, text);
            posted += 1;
        }
        Ok(posted)
    }

    async fn post_reminders(
        &self,
        due: impl Iterator<Item = PeriodSummary>,
        title: &str,
        line: impl Fn(&PeriodSummary) -> String,
    ) -> Result<usize> {
        let mut posted = 0;
        let by_community = due
            .into_group_map_by(|summary| summary.period.community_id.clone())
            .into_iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .collect::<Vec<(String, Vec<PeriodSummary>)>>();
        for (community_id, summaries) in by_community {
            let config = self.db.community_config(&community_id).await?;
            let Some(destination) = config.reminder_destination() else {
                debug!("No reminder destination for {community_id}");
                continue;
            };
            let text = std::iter::once(title.to_string())
                .chain(summaries.iter().map(&line))
                .join("\n");
            self.notifier.post(destination, text);
            posted += 1;
        }
        Ok(posted)
    }
}
