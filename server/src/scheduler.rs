use std::{
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use rocket::{fairing::AdHoc, tokio};
use serde::Deserialize;
use tracing::{error, info, instrument};

use crate::Context;

fn default_run_hour() -> u32 {
    9
}

fn default_digest_hour() -> u32 {
    10
}

fn default_tick_minutes() -> u64 {
    60
}

fn default_sweep_budget_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_run_hour")]
    pub run_hour: u32,
    #[serde(default = "default_digest_hour")]
    pub digest_hour: u32,
    #[serde(default = "default_tick_minutes")]
    pub tick_minutes: u64,
    #[serde(default = "default_sweep_budget_secs")]
    pub sweep_budget_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_hour: default_run_hour(),
            digest_hour: default_digest_hour(),
            tick_minutes: default_tick_minutes(),
            sweep_budget_secs: default_sweep_budget_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_minutes.max(1) * 60)
    }

    pub fn sweep_budget(&self) -> Duration {
        Duration::from_secs(self.sweep_budget_secs.max(1))
    }
}

/// Periodic jobs, listed in the order a tick runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Sweep {
    DailyReminders,
    InsufficientGoals,
    EndedPeriods,
    StreakAbsence,
    ExpiredChallenges,
    MonthlyDigest,
}

impl Sweep {
    pub const DAILY: [Sweep; 5] = [
        Sweep::DailyReminders,
        Sweep::InsufficientGoals,
        Sweep::EndedPeriods,
        Sweep::StreakAbsence,
        Sweep::ExpiredChallenges,
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub ran: Vec<Sweep>,
    pub failed: Vec<Sweep>,
}

/// Runs the sweeps one after another. Each sweep gets its own time budget
/// and a failing sweep never stops the ones after it.
#[derive(Debug)]
pub struct Scheduler {
    context: Context,
    config: SchedulerConfig,
    last_daily_run: Option<NaiveDate>,
    last_digest_run: Option<NaiveDate>,
}

impl Scheduler {
    pub fn new(context: Context, config: SchedulerConfig) -> Self {
        Self {
            context,
            config,
            last_daily_run: None,
            last_digest_run: None,
        }
    }

    /// Sweeps owed at `now`. Daily sweeps run once on the run hour, the
    /// digest once on the first of the month at the digest hour.
    pub fn due_sweeps(&self, now: NaiveDateTime) -> Vec<Sweep> {
        let today = now.date();
        let mut due = Vec::new();
        if now.hour() == self.config.run_hour && self.last_daily_run != Some(today) {
            due.extend(Sweep::DAILY);
        }
        if now.day() == 1
            && now.hour() == self.config.digest_hour
            && self.last_digest_run != Some(today)
        {
            due.push(Sweep::MonthlyDigest);
        }
        due
    }

    #[instrument(skip(self))]
    pub async fn tick(&mut self) -> TickReport {
        let now = self.context.now();
        let due = self.due_sweeps(now);
        if due.contains(&Sweep::DailyReminders) {
            self.last_daily_run = Some(now.date());
        }
        if due.contains(&Sweep::MonthlyDigest) {
            self.last_digest_run = Some(now.date());
        }

        let mut report = TickReport::default();
        for sweep in due {
            report.ran.push(sweep);
            match tokio::time::timeout(self.config.sweep_budget(), self.run(sweep)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Sweep {sweep} failed: {:#}", e);
                    report.failed.push(sweep);
                }
                Err(_) => {
                    error!(
                        "Sweep {sweep} exceeded its budget of {:?}",
                        self.config.sweep_budget()
                    );
                    report.failed.push(sweep);
                }
            }
        }
        report
    }

    async fn run(&self, sweep: Sweep) -> anyhow::Result<()> {
        let context = &self.context;
        match sweep {
            Sweep::DailyReminders => {
                let posted = context.daily_reminder_sweep().await?;
                info!("Posted {posted} daily reminders");
            }
            Sweep::InsufficientGoals => {
                let posted = context.insufficient_goals_sweep().await?;
                info!("Posted {posted} insufficient goal nudges");
            }
            Sweep::EndedPeriods => {
                let report = context.sweep_all_ended_periods().await?;
                info!("Finalized {} ended focus periods", report.finalized);
                if report.failed > 0 {
                    anyhow::bail!("{} communities failed to finalize", report.failed);
                }
            }
            Sweep::StreakAbsence => {
                let posted = context.streak_absence_sweep().await?;
                info!("Posted {posted} streak reminders");
            }
            Sweep::ExpiredChallenges => {
                let closed = context.fail_expired_challenges().await?;
                info!("Closed {} expired challenges", closed.len());
            }
            Sweep::MonthlyDigest => {
                let posted = context.monthly_digest().await?;
                info!("Posted {posted} monthly digests");
            }
        }
        Ok(())
    }

    /// Ticks until `running` is cleared.
    pub async fn run_forever(mut self, running: Arc<AtomicBool>) {
        let mut interval = tokio::time::interval(self.config.tick());
        while running.load(std::sync::atomic::Ordering::Relaxed) {
            interval.tick().await;
            self.tick().await;
        }
    }
}

pub fn stage(config: SchedulerConfig, running: Arc<AtomicBool>) -> AdHoc {
    AdHoc::on_ignite("Scheduler", move |rocket| async move {
        rocket.attach(AdHoc::on_liftoff("Runs periodic sweeps", move |rocket| {
            Box::pin(async move {
                let Some(context) = rocket.state::<Context>().cloned() else {
                    error!("Scheduler not started: engine context is missing");
                    return;
                };
                tokio::spawn(Scheduler::new(context, config).run_forever(running));
            })
        }))
    })
}
