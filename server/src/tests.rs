use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration as StdDuration,
};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rocket::tokio::{self, sync::mpsc::UnboundedReceiver};
use shared::{EstimateError, Estimator, ManualClock, Points, StreakState, WinCategory};

use super::*;
use crate::{
    db::{
        types::{ChallengeStatus, ParticipantStatus, Standup},
        DB,
    },
    events::{dispatch, Notification, NotificationSink, Notifier},
    scheduler::{Scheduler, SchedulerConfig, Sweep},
    streaks::CheckInReceipt,
};

pub const COMMUNITY: &str = "founders";
pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
pub const CAROL: &str = "carol";
pub const DESTINATION: &str = "leaderboard-chat";
pub const REMINDERS: &str = "reminder-chat";

/// Monday 2024-03-04 is day 1 of the periods started in these tests.
pub fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

pub fn start() -> NaiveDateTime {
    at(4, 10)
}

type Estimate = std::result::Result<Points, EstimateError>;

/// Hands out queued estimates, then the default.
#[derive(Default)]
pub struct ScriptedEstimator {
    replies: Mutex<VecDeque<Estimate>>,
}

impl ScriptedEstimator {
    pub fn new(replies: Vec<Estimate>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait::async_trait]
impl Estimator for ScriptedEstimator {
    async fn estimate(&self, _: &str, _: Option<&str>) -> Estimate {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(shared::DEFAULT_GOAL_POINTS))
    }
}

pub struct HangingEstimator;

#[async_trait::async_trait]
impl Estimator for HangingEstimator {
    async fn estimate(&self, _: &str, _: Option<&str>) -> Estimate {
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        Ok(9)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, destination: &str, text: &str) -> anyhow::Result<()> {
        self.delivered
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

pub struct ContextExt {
    pub context: Context,
    pub clock: Arc<ManualClock>,
    pub notifications: UnboundedReceiver<Notification>,
}

impl ContextExt {
    pub async fn new() -> Self {
        Self::with_estimator(Arc::new(ScriptedEstimator::default())).await
    }

    pub async fn with_estimator(estimator: Arc<dyn Estimator>) -> Self {
        let db = DB::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let (notifier, notifications) = Notifier::channel();
        let context = Context::new(db, notifier)
            .with_clock(clock.clone())
            .with_estimator(estimator, StdDuration::from_millis(200));
        Self {
            context,
            clock,
            notifications,
        }
    }

    pub async fn with_estimates(points: &[Points]) -> Self {
        let replies = points.iter().map(|points| Ok(*points)).collect();
        Self::with_estimator(Arc::new(ScriptedEstimator::new(replies))).await
    }

    pub fn set_now(&self, now: NaiveDateTime) {
        self.clock.set(now);
    }

    pub fn drain(&mut self) -> Vec<Notification> {
        let mut drained = vec![];
        while let Ok(notification) = self.notifications.try_recv() {
            drained.push(notification);
        }
        drained
    }

    pub fn posts(&mut self) -> Vec<(String, String)> {
        self.drain()
            .into_iter()
            .filter_map(|notification| match notification {
                Notification::Post { destination, text } => Some((destination, text)),
                _ => None,
            })
            .collect()
    }

    pub async fn configure(&self) {
        self.context
            .set_leaderboard_destination(COMMUNITY, Some(DESTINATION))
            .await
            .unwrap();
        self.context
            .set_reminder_destination(COMMUNITY, Some(REMINDERS))
            .await
            .unwrap();
    }

    pub async fn user_id(&self, account: &str) -> i64 {
        self.context
            .upsert_user(account, COMMUNITY, None)
            .await
            .unwrap()
            .id
    }

    pub async fn points(&self, account: &str) -> i64 {
        self.context
            .lifetime_points(account, COMMUNITY)
            .await
            .unwrap()
    }

    pub async fn sprint_points(&self, account: &str, period_id: i64) -> i64 {
        let user_id = self.user_id(account).await;
        self.context
            .db
            .sprint_points(period_id, user_id)
            .await
            .unwrap()
    }

    /// Starts a period for `account` with goals worth the queued estimates.
    pub async fn period_with_goals(&self, account: &str, goals: &[&str]) -> i64 {
        let period = self.context.start_period(account, COMMUNITY).await.unwrap();
        for title in goals {
            self.context.add_goal(period.id, title, None).await.unwrap();
        }
        period.id
    }

    pub async fn check_in(&self, account: &str, moment: NaiveDateTime) -> Result<CheckInReceipt> {
        self.context
            .record_check_in(account, COMMUNITY, moment, Standup::default())
            .await
    }
}

#[tokio::test]
async fn ledger_total_is_the_sum_of_concurrent_awards() {
    let ext = ContextExt::new().await;
    let user_id = ext.user_id(ALICE).await;

    let handles = (1..=20)
        .map(|amount| {
            let context = ext.context.clone();
            tokio::spawn(async move { context.add_points(user_id, None, amount).await })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(ext.points(ALICE).await, 210);
}

#[tokio::test]
async fn ledger_award_is_atomic_with_its_transaction() {
    let ext = ContextExt::with_estimates(&[]).await;
    let period_id = ext.period_with_goals(ALICE, &[]).await;
    let user_id = ext.user_id(ALICE).await;
    let period = ext.context.db.get_period(period_id).await.unwrap().unwrap();

    let mut tx = ext.context.db.begin().await.unwrap();
    DB::add_points(&mut tx, user_id, Some(period.sprint()), 5, start())
        .await
        .unwrap();
    drop(tx);

    assert_eq!(ext.points(ALICE).await, 0);
    assert_eq!(ext.sprint_points(ALICE, period_id).await, 0);

    let missing = ext.context.add_points(user_id + 100, None, 3).await;
    assert!(matches!(missing, Err(Error::Storage(sqlx::Error::RowNotFound))));
}

#[tokio::test]
async fn focus_period_scenario() {
    let mut ext = ContextExt::with_estimates(&[2, 5, 8]).await;
    ext.configure().await;
    let period_id = ext
        .period_with_goals(ALICE, &["Ship landing page", "Call ten customers", "Launch beta"])
        .await;

    let goals = ext.context.db.get_goals(period_id).await.unwrap();
    assert_eq!(
        goals.iter().map(|goal| (goal.position, goal.points)).collect::<Vec<_>>(),
        vec![(1, 2), (2, 5), (3, 8)]
    );

    ext.set_now(at(5, 12));
    ext.context.complete_goal(period_id, 2).await.unwrap();
    assert_eq!(ext.points(ALICE).await, 5);
    assert_eq!(ext.sprint_points(ALICE, period_id).await, 5);

    ext.set_now(at(14, 12));
    ext.context.complete_goal(period_id, 1).await.unwrap();
    assert_eq!(ext.points(ALICE).await, 7);
    assert_eq!(ext.sprint_points(ALICE, period_id).await, 7);

    let sprint = ext.context.current_sprint(COMMUNITY, 10).await.unwrap();
    assert_eq!(sprint.len(), 1);
    assert_eq!(sprint[0].points, 7);
    assert_eq!(sprint[0].completed_goals, 2);
    ext.drain();

    ext.set_now(at(19, 9));
    let report = ext.context.sweep_ended_periods(COMMUNITY).await.unwrap();
    assert_eq!(report.finalized, 1);
    assert!(report.leaderboard_posted);

    let posts = ext.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0, DESTINATION);
    assert!(posts[0].1.contains("alice - 7 pts"));

    assert!(ext.context.current_sprint(COMMUNITY, 10).await.unwrap().is_empty());
    let all_time = ext.context.all_time(COMMUNITY, 10).await.unwrap();
    assert_eq!(all_time[0].account_id, ALICE);
    assert_eq!(all_time[0].points, 7);
}

#[tokio::test]
async fn sweeping_twice_finalizes_nothing_new() {
    let mut ext = ContextExt::with_estimates(&[3]).await;
    ext.configure().await;
    let period_id = ext.period_with_goals(ALICE, &["Write the pitch"]).await;
    ext.context.complete_goal(period_id, 1).await.unwrap();
    ext.drain();

    ext.set_now(at(20, 9));
    let first = ext.context.sweep_ended_periods(COMMUNITY).await.unwrap();
    assert_eq!(first.finalized, 1);
    assert_eq!(ext.posts().len(), 1);

    let second = ext.context.sweep_ended_periods(COMMUNITY).await.unwrap();
    assert_eq!(second.finalized, 0);
    assert!(!second.leaderboard_posted);
    assert!(ext.posts().is_empty());
}

#[tokio::test]
async fn one_message_for_many_ended_periods() {
    let mut ext = ContextExt::with_estimates(&[3, 4]).await;
    ext.configure().await;
    let alice = ext.period_with_goals(ALICE, &["Pricing page"]).await;
    let bob = ext.period_with_goals(BOB, &["Hire a designer"]).await;
    ext.context.complete_goal(alice, 1).await.unwrap();
    ext.context.complete_goal(bob, 1).await.unwrap();
    ext.drain();

    ext.set_now(at(18, 0));
    let report = ext.context.sweep_all_ended_periods().await.unwrap();
    assert_eq!(report.finalized, 2);

    let posts = ext.posts();
    assert_eq!(posts.len(), 1);
    let bob_line = posts[0].1.find("bob").unwrap();
    let alice_line = posts[0].1.find("alice").unwrap();
    assert!(bob_line < alice_line);
}

#[tokio::test]
async fn sweep_without_destination_keeps_periods_pending() {
    let mut ext = ContextExt::with_estimates(&[3]).await;
    let period_id = ext.period_with_goals(ALICE, &["Record demo"]).await;
    ext.context.complete_goal(period_id, 1).await.unwrap();
    ext.drain();

    ext.set_now(at(19, 9));
    let report = ext.context.sweep_ended_periods(COMMUNITY).await.unwrap();
    assert_eq!(report.finalized, 0);
    assert!(ext.posts().is_empty());

    ext.configure().await;
    let report = ext.context.sweep_ended_periods(COMMUNITY).await.unwrap();
    assert_eq!(report.finalized, 1);
    assert_eq!(ext.posts().len(), 1);
}

#[tokio::test]
async fn sweep_without_points_finalizes_silently() {
    let mut ext = ContextExt::new().await;
    ext.configure().await;
    ext.period_with_goals(ALICE, &[]).await;

    ext.set_now(at(19, 9));
    let report = ext.context.sweep_ended_periods(COMMUNITY).await.unwrap();
    assert_eq!(report.finalized, 1);
    assert!(!report.leaderboard_posted);
    assert!(ext.posts().is_empty());
}

#[tokio::test]
async fn only_one_active_period_per_member() {
    let ext = ContextExt::new().await;
    let period = ext.context.start_period(ALICE, COMMUNITY).await.unwrap();
    assert_eq!(period.start_date, at(4, 0));
    assert_eq!(period.end_date, at(18, 0));
    assert!(!period.leaderboard_finalized);

    ext.set_now(at(10, 15));
    assert!(matches!(
        ext.context.start_period(ALICE, COMMUNITY).await,
        Err(Error::AlreadyActive)
    ));
    ext.context.start_period(BOB, COMMUNITY).await.unwrap();

    ext.set_now(at(18, 0));
    let next = ext.context.start_period(ALICE, COMMUNITY).await.unwrap();
    assert_eq!(next.start_date, at(18, 0));
}

#[tokio::test]
async fn goals_need_an_active_period() {
    let ext = ContextExt::new().await;
    assert!(matches!(
        ext.context
            .add_goal_to_active_period(ALICE, COMMUNITY, "Plan", None)
            .await,
        Err(Error::NoActivePeriod)
    ));

    let period = ext.context.start_period(ALICE, COMMUNITY).await.unwrap();
    ext.set_now(at(18, 1));
    assert!(matches!(
        ext.context.add_goal(period.id, "Too late", None).await,
        Err(Error::NoActivePeriod)
    ));
    assert!(matches!(
        ext.context.add_goal(period.id + 1, "Nowhere", None).await,
        Err(Error::NoActivePeriod)
    ));
}

#[tokio::test]
async fn estimator_failures_fall_back_to_default_points() {
    let estimator = ScriptedEstimator::new(vec![
        Err(EstimateError::Http("503 Service Unavailable".to_string())),
        Err(EstimateError::Unparseable("no idea".to_string())),
        Ok(9),
    ]);
    let ext = ContextExt::with_estimator(Arc::new(estimator)).await;
    let period_id = ext
        .period_with_goals(ALICE, &["Fix onboarding", "Write docs", "Ship v2"])
        .await;

    let goals = ext.context.db.get_goals(period_id).await.unwrap();
    assert_eq!(
        goals.iter().map(|goal| (goal.position, goal.points)).collect::<Vec<_>>(),
        vec![(1, 5), (2, 5), (3, 9)]
    );
}

#[tokio::test]
async fn hanging_estimator_times_out_to_default_points() {
    let ext = ContextExt::with_estimator(Arc::new(HangingEstimator)).await;
    let goal = ext
        .context
        .add_goal_to_active_period(ALICE, COMMUNITY, "Anything", None)
        .await;
    assert!(matches!(goal, Err(Error::NoActivePeriod)));

    ext.context.start_period(ALICE, COMMUNITY).await.unwrap();
    let goal = ext
        .context
        .add_goal_to_active_period(ALICE, COMMUNITY, "Anything", Some("details"))
        .await
        .unwrap();
    assert_eq!(goal.points, 5);
    assert_eq!(goal.description.as_deref(), Some("details"));
}

#[tokio::test]
async fn completing_goals_reports_domain_errors() {
    let ext = ContextExt::with_estimates(&[4]).await;
    let period_id = ext.period_with_goals(ALICE, &["Send invoices"]).await;

    assert!(matches!(
        ext.context.complete_goal(period_id, 9).await,
        Err(Error::GoalNotFound(9))
    ));

    let goal = ext.context.complete_goal(period_id, 1).await.unwrap();
    assert!(goal.completed);
    assert_eq!(goal.completed_at, Some(start()));

    let again = ext.context.complete_goal(period_id, 1).await;
    assert!(matches!(again, Err(Error::AlreadyCompleted(1))));
    assert!(again.unwrap_err().is_user_facing());
    assert_eq!(ext.points(ALICE).await, 4);
}

#[tokio::test]
async fn concurrent_completions() {
    let ext = ContextExt::with_estimates(&[3, 6]).await;
    let period_id = ext.period_with_goals(ALICE, &["First", "Second"]).await;

    let first = {
        let context = ext.context.clone();
        tokio::spawn(async move { context.complete_goal(period_id, 1).await })
    };
    let second = {
        let context = ext.context.clone();
        tokio::spawn(async move { context.complete_goal(period_id, 2).await })
    };
    let duplicate = {
        let context = ext.context.clone();
        tokio::spawn(async move { context.complete_goal(period_id, 2).await })
    };

    first.await.unwrap().unwrap();
    let results = [second.await.unwrap(), duplicate.await.unwrap()];
    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|result| matches!(result, Err(Error::AlreadyCompleted(2)))));

    assert_eq!(ext.points(ALICE).await, 9);
    assert_eq!(ext.sprint_points(ALICE, period_id).await, 9);
}

#[tokio::test]
async fn consecutive_check_ins_grow_the_streak() {
    let ext = ContextExt::new().await;
    for day in 4..=6 {
        ext.check_in(ALICE, at(day, 8)).await.unwrap();
    }
    let state = ext.context.streak_state(ALICE, COMMUNITY).await.unwrap();
    assert_eq!(state.current, 3);
    assert_eq!(state.longest, 3);
    assert_eq!(state.total_check_ins, 3);
}

#[tokio::test]
async fn gap_resets_the_streak_but_keeps_the_longest() {
    let ext = ContextExt::new().await;
    ext.check_in(ALICE, at(4, 8)).await.unwrap();
    ext.check_in(ALICE, at(5, 23)).await.unwrap();
    let receipt = ext.check_in(ALICE, at(9, 7)).await.unwrap();

    assert_eq!(receipt.streak.current, 1);
    assert_eq!(receipt.streak.longest, 2);
    assert_eq!(receipt.streak.total_check_ins, 3);
    assert_eq!(receipt.points_awarded, 1);
}

#[tokio::test]
async fn duplicate_check_in_changes_nothing() {
    let ext = ContextExt::new().await;
    ext.check_in(ALICE, at(4, 8)).await.unwrap();
    let before = ext.context.streak_state(ALICE, COMMUNITY).await.unwrap();

    let duplicate = ext.check_in(ALICE, at(4, 22)).await;
    assert!(matches!(duplicate, Err(Error::DuplicateCheckIn)));

    assert_eq!(ext.context.streak_state(ALICE, COMMUNITY).await.unwrap(), before);
    assert_eq!(ext.points(ALICE).await, 1);
}

#[tokio::test]
async fn concurrent_duplicate_check_ins_accept_one() {
    let ext = ContextExt::new().await;
    let handles = (0..5)
        .map(|minute| {
            let context = ext.context.clone();
            let moment = at(4, 8) + Duration::minutes(minute);
            tokio::spawn(async move {
                context
                    .record_check_in(ALICE, COMMUNITY, moment, Standup::default())
                    .await
            })
        })
        .collect::<Vec<_>>();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert!(matches!(e, Error::DuplicateCheckIn)),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(
        ext.context.streak_state(ALICE, COMMUNITY).await.unwrap().total_check_ins,
        1
    );
    assert_eq!(ext.points(ALICE).await, 1);
}

#[tokio::test]
async fn seventh_day_awards_the_milestone_bonus() {
    let mut ext = ContextExt::new().await;
    for day in 4..=9 {
        let receipt = ext.check_in(ALICE, at(day, 8)).await.unwrap();
        assert_eq!(receipt.bonus, None);
        assert_eq!(receipt.points_awarded, 1);
    }
    let receipt = ext.check_in(ALICE, at(10, 8)).await.unwrap();
    assert_eq!(receipt.streak.current, 7);
    assert_eq!(receipt.bonus, Some(10));
    assert_eq!(receipt.points_awarded, 11);
    assert_eq!(ext.points(ALICE).await, 17);

    let receipt = ext.check_in(ALICE, at(11, 8)).await.unwrap();
    assert_eq!(receipt.streak.current, 8);
    assert_eq!(receipt.bonus, None);

    let milestones = ext
        .drain()
        .into_iter()
        .filter(|notification| matches!(notification, Notification::StreakMilestone { .. }))
        .collect::<Vec<_>>();
    assert_eq!(
        milestones,
        vec![Notification::StreakMilestone {
            community_id: COMMUNITY.to_string(),
            name: ALICE.to_string(),
            streak: 7,
            bonus: 10,
        }]
    );
}

#[tokio::test]
async fn check_ins_count_towards_the_active_sprint() {
    let ext = ContextExt::new().await;
    ext.check_in(BOB, at(4, 8)).await.unwrap();
    let period = ext.context.start_period(ALICE, COMMUNITY).await.unwrap();
    ext.check_in(ALICE, at(4, 11)).await.unwrap();

    assert_eq!(ext.sprint_points(ALICE, period.id).await, 1);
    let sprint = ext.context.current_sprint(COMMUNITY, 10).await.unwrap();
    assert_eq!(sprint.len(), 1);
    assert_eq!(sprint[0].account_id, ALICE);
    assert_eq!(ext.context.all_time(COMMUNITY, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn ties_go_to_whoever_scored_first() {
    let ext = ContextExt::new().await;
    ext.context.start_period(BOB, COMMUNITY).await.unwrap();
    ext.context.start_period(ALICE, COMMUNITY).await.unwrap();
    let bob = ext.user_id(BOB).await;
    let alice = ext.user_id(ALICE).await;

    ext.set_now(at(4, 11));
    ext.check_in(ALICE, at(4, 11)).await.unwrap();
    ext.set_now(at(4, 12));
    ext.check_in(BOB, at(4, 12)).await.unwrap();

    let all_time = ext.context.all_time(COMMUNITY, 10).await.unwrap();
    assert_eq!(
        all_time.iter().map(|entry| (entry.place, entry.user_id)).collect::<Vec<_>>(),
        vec![(1, alice), (2, bob)]
    );
    let sprint = ext.context.current_sprint(COMMUNITY, 10).await.unwrap();
    assert_eq!(
        sprint.iter().map(|entry| entry.user_id).collect::<Vec<_>>(),
        vec![alice, bob]
    );

    ext.context.add_points(bob, None, 1).await.unwrap();
    let all_time = ext.context.all_time(COMMUNITY, 1).await.unwrap();
    assert_eq!(all_time.len(), 1);
    assert_eq!(all_time[0].user_id, bob);
}

#[tokio::test]
async fn empty_leaderboards_are_not_errors() {
    let ext = ContextExt::new().await;
    ext.user_id(ALICE).await;
    assert!(ext.context.all_time(COMMUNITY, 10).await.unwrap().is_empty());
    assert!(ext.context.current_sprint(COMMUNITY, 10).await.unwrap().is_empty());
    assert!(ext.context.streak_leaderboard(COMMUNITY, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn leaderboards_stay_inside_their_community() {
    let ext = ContextExt::new().await;
    ext.context
        .record_check_in(ALICE, "makers", at(4, 8), Standup::default())
        .await
        .unwrap();
    assert!(ext.context.all_time(COMMUNITY, 10).await.unwrap().is_empty());
    assert_eq!(ext.context.all_time("makers", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn streak_leaderboard_skips_broken_streaks() {
    let ext = ContextExt::new().await;
    ext.check_in(ALICE, at(3, 8)).await.unwrap();
    ext.check_in(ALICE, at(4, 8)).await.unwrap();
    ext.check_in(BOB, at(4, 9)).await.unwrap();
    ext.check_in(CAROL, at(1, 9)).await.unwrap();

    let board = ext.context.streak_leaderboard(COMMUNITY, 10).await.unwrap();
    assert_eq!(
        board
            .iter()
            .map(|entry| (entry.account_id.as_str(), entry.current_streak))
            .collect::<Vec<_>>(),
        vec![(ALICE, 2), (BOB, 1)]
    );
}

#[tokio::test]
async fn wins_award_fixed_points() {
    let ext = ContextExt::new().await;
    let period = ext.context.start_period(ALICE, COMMUNITY).await.unwrap();

    let win = ext
        .context
        .share_win(ALICE, COMMUNITY, "First paying customer!", Some("Revenue"))
        .await
        .unwrap();
    assert_eq!(win.category(), WinCategory::Revenue);
    let win = ext
        .context
        .share_win(ALICE, COMMUNITY, "Podcast invite", Some("press"))
        .await
        .unwrap();
    assert_eq!(win.category(), WinCategory::Other);

    assert_eq!(ext.points(ALICE).await, 4);
    assert_eq!(ext.sprint_points(ALICE, period.id).await, 4);
    assert!(matches!(
        ext.context.share_win(ALICE, COMMUNITY, "   ", None).await,
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test]
async fn challenge_validation_flow() {
    let ext = ContextExt::new().await;
    let challenge = ext
        .context
        .create_challenge(COMMUNITY, ALICE, "Cold outreach", None, 7, &[BOB], Some(2.0))
        .await
        .unwrap();
    assert_eq!(challenge.status, ChallengeStatus::Active);
    assert_eq!(challenge.end_date, at(11, 0));
    assert_eq!(ext.context.challenge_participants(challenge.id).await.unwrap().len(), 2);

    assert!(matches!(
        ext.context
            .validate_challenge_completion(challenge.id, ALICE, BOB, true)
            .await,
        Err(Error::InvalidState(_))
    ));

    let submitted = ext
        .context
        .submit_challenge_completion(challenge.id, BOB)
        .await
        .unwrap();
    assert_eq!(submitted.status, ParticipantStatus::Submitted);
    assert!(matches!(
        ext.context.submit_challenge_completion(challenge.id, BOB).await,
        Err(Error::InvalidState(_))
    ));

    assert!(matches!(
        ext.context
            .validate_challenge_completion(challenge.id, BOB, BOB, true)
            .await,
        Err(Error::SelfValidation)
    ));
    ext.user_id(CAROL).await;
    assert!(matches!(
        ext.context
            .validate_challenge_completion(challenge.id, CAROL, BOB, true)
            .await,
        Err(Error::NotParticipant)
    ));

    let rejected = ext
        .context
        .validate_challenge_completion(challenge.id, ALICE, BOB, false)
        .await
        .unwrap();
    assert_eq!(rejected.points_awarded, 0);

    ext.context
        .submit_challenge_completion(challenge.id, BOB)
        .await
        .unwrap();
    let approved = ext
        .context
        .validate_challenge_completion(challenge.id, ALICE, BOB, true)
        .await
        .unwrap();
    assert_eq!(approved.points_awarded, 20);
    assert_eq!(ext.points(BOB).await, 20);
    assert!(ext.context.current_sprint(COMMUNITY, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn challenge_multiplier_is_normalized() {
    let ext = ContextExt::new().await;
    let default = ext
        .context
        .create_challenge(COMMUNITY, ALICE, "Default", None, 3, &[], Some(-1.0))
        .await
        .unwrap();
    assert_eq!(default.multiplier, 1.5);
    let capped = ext
        .context
        .create_challenge(COMMUNITY, ALICE, "Capped", None, 3, &[], Some(10.0))
        .await
        .unwrap();
    assert_eq!(capped.multiplier().reward(), 30);
    assert!(matches!(
        ext.context
            .create_challenge(COMMUNITY, ALICE, "Zero", None, 0, &[], None)
            .await,
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test]
async fn expired_challenges_are_closed() {
    let ext = ContextExt::new().await;
    let everyone_done = ext
        .context
        .create_challenge(COMMUNITY, ALICE, "Done", None, 2, &[BOB], None)
        .await
        .unwrap();
    let unfinished = ext
        .context
        .create_challenge(COMMUNITY, ALICE, "Unfinished", None, 2, &[BOB], None)
        .await
        .unwrap();

    for (validator, target) in [(BOB, ALICE), (ALICE, BOB)] {
        ext.context
            .submit_challenge_completion(everyone_done.id, target)
            .await
            .unwrap();
        ext.context
            .validate_challenge_completion(everyone_done.id, validator, target, true)
            .await
            .unwrap();
    }
    ext.context
        .submit_challenge_completion(unfinished.id, BOB)
        .await
        .unwrap();

    assert!(ext.context.fail_expired_challenges().await.unwrap().is_empty());

    ext.set_now(at(6, 0));
    let closed = ext.context.fail_expired_challenges().await.unwrap();
    assert_eq!(
        closed,
        vec![
            (everyone_done.id, ChallengeStatus::Completed),
            (unfinished.id, ChallengeStatus::Failed)
        ]
    );
    let participants = ext.context.challenge_participants(unfinished.id).await.unwrap();
    assert!(participants
        .iter()
        .all(|participant| participant.status == ParticipantStatus::Failed));
    assert!(matches!(
        ext.context.submit_challenge_completion(unfinished.id, BOB).await,
        Err(Error::InvalidState(_))
    ));
    assert!(ext.context.fail_expired_challenges().await.unwrap().is_empty());
}

#[tokio::test]
async fn goal_completion_reaches_buddies_after_commit() {
    let mut ext = ContextExt::with_estimates(&[6]).await;
    ext.context
        .add_buddy_pair(COMMUNITY, ALICE, BOB)
        .await
        .unwrap();
    ext.context
        .add_buddy_pair(COMMUNITY, ALICE, CAROL)
        .await
        .unwrap();
    assert!(ext
        .context
        .set_buddy_notifications(COMMUNITY, CAROL, ALICE, false)
        .await
        .unwrap());

    let period_id = ext.period_with_goals(ALICE, &["Close the deal"]).await;
    ext.context.complete_goal(period_id, 1).await.unwrap();

    let sink = RecordingSink::default();
    for notification in ext.drain() {
        dispatch(&ext.context.db, &sink, notification).await.unwrap();
    }
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, BOB);
    assert!(delivered[0].1.contains("Close the deal"));
    assert!(delivered[0].1.contains("+6 pts"));
}

#[tokio::test]
async fn dispatcher_survives_a_closed_database() {
    let ext = ContextExt::new().await;
    let sink = Arc::new(RecordingSink::default());
    let (notifier, receiver) = Notifier::channel();
    let handle = events::spawn_dispatcher(ext.context.db.clone(), sink.clone(), receiver);

    ext.context.db.close().await;
    notifier.send(Notification::GoalCompleted {
        user_id: 1,
        community_id: COMMUNITY.to_string(),
        name: ALICE.to_string(),
        position: 1,
        title: "Anything".to_string(),
        points: 5,
    });
    notifier.post(DESTINATION, "still delivered".to_string());
    drop(notifier);
    handle.await.unwrap();

    assert_eq!(
        sink.delivered(),
        vec![(DESTINATION.to_string(), "still delivered".to_string())]
    );
}

#[tokio::test]
async fn reminder_sweeps_follow_the_period_calendar() {
    let mut ext = ContextExt::with_estimates(&[2, 2, 2]).await;
    ext.configure().await;
    ext.period_with_goals(ALICE, &["One", "Two", "Three"]).await;
    ext.period_with_goals(BOB, &["Only one"]).await;

    ext.set_now(at(5, 9));
    assert_eq!(ext.context.daily_reminder_sweep().await.unwrap(), 0);
    assert_eq!(ext.context.insufficient_goals_sweep().await.unwrap(), 1);
    let posts = ext.posts();
    assert_eq!(posts[0].0, REMINDERS);
    assert!(posts[0].1.contains("bob - 1 of 3 goals set"));
    assert!(!posts[0].1.contains("alice"));

    ext.set_now(at(6, 9));
    assert_eq!(ext.context.daily_reminder_sweep().await.unwrap(), 1);
    let posts = ext.posts();
    assert!(posts[0].1.contains("alice - day 3/14, 3 of 3 goals pending"));
    assert!(posts[0].1.contains("bob"));

    ext.set_now(at(7, 9));
    assert_eq!(ext.context.daily_reminder_sweep().await.unwrap(), 0);
    assert_eq!(ext.context.insufficient_goals_sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn streak_absence_sweep_lists_quiet_members() {
    let mut ext = ContextExt::new().await;
    ext.configure().await;
    ext.context.start_period(ALICE, COMMUNITY).await.unwrap();
    ext.context.start_period(BOB, COMMUNITY).await.unwrap();
    ext.check_in(ALICE, at(4, 8)).await.unwrap();
    ext.check_in(BOB, at(4, 8)).await.unwrap();
    ext.check_in(CAROL, at(4, 8)).await.unwrap();

    ext.set_now(at(5, 9));
    ext.check_in(ALICE, at(5, 8)).await.unwrap();
    ext.drain();
    assert_eq!(ext.context.streak_absence_sweep().await.unwrap(), 1);
    let posts = ext.posts();
    assert!(posts[0].1.contains("bob - 1-day streak on the line"));
    assert!(!posts[0].1.contains("alice"));
    assert!(!posts[0].1.contains("carol"));
}

#[tokio::test]
async fn monthly_digest_reports_last_month() {
    let mut ext = ContextExt::new().await;
    ext.configure().await;
    ext.context
        .share_win(ALICE, COMMUNITY, "Closed our seed round", Some("revenue"))
        .await
        .unwrap();

    ext.set_now(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap().and_hms_opt(10, 0, 0).unwrap());
    ext.context
        .share_win(BOB, COMMUNITY, "Too recent", None)
        .await
        .unwrap();
    assert_eq!(ext.context.monthly_digest().await.unwrap(), 1);

    let posts = ext.posts();
    assert_eq!(posts[0].0, DESTINATION);
    assert!(posts[0].1.contains("March 2024"));
    assert!(posts[0].1.contains("[revenue] alice: Closed our seed round"));
    assert!(!posts[0].1.contains("Too recent"));
    assert!(posts[0].1.contains("🥇 alice - 2 pts"));
}

#[tokio::test]
async fn scheduler_runs_daily_sweeps_once_at_the_run_hour() {
    let ext = ContextExt::new().await;
    let mut scheduler = Scheduler::new(ext.context.clone(), SchedulerConfig::default());

    ext.set_now(at(4, 8));
    assert!(scheduler.tick().await.ran.is_empty());

    ext.set_now(at(4, 9));
    let report = scheduler.tick().await;
    assert_eq!(report.ran, Sweep::DAILY.to_vec());
    assert!(report.failed.is_empty());

    ext.set_now(at(4, 9) + Duration::minutes(30));
    assert!(scheduler.tick().await.ran.is_empty());

    ext.set_now(at(5, 9));
    assert_eq!(scheduler.tick().await.ran.len(), 5);
}

#[tokio::test]
async fn scheduler_adds_the_digest_on_the_first_of_the_month() {
    let ext = ContextExt::new().await;
    let scheduler = Scheduler::new(
        ext.context.clone(),
        SchedulerConfig {
            digest_hour: 9,
            ..Default::default()
        },
    );
    let first = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap().and_hms_opt(9, 5, 0).unwrap();
    let due = scheduler.due_sweeps(first);
    assert_eq!(due.len(), 6);
    assert_eq!(due.last(), Some(&Sweep::MonthlyDigest));

    let scheduler = Scheduler::new(ext.context.clone(), SchedulerConfig::default());
    assert_eq!(scheduler.due_sweeps(first), Sweep::DAILY.to_vec());
    assert_eq!(
        scheduler.due_sweeps(first + Duration::hours(1)),
        vec![Sweep::MonthlyDigest]
    );
    assert!(scheduler.due_sweeps(first + Duration::days(1) + Duration::hours(1)).is_empty());
}

#[tokio::test]
async fn failing_sweeps_do_not_stop_the_tick() {
    let ext = ContextExt::new().await;
    let mut scheduler = Scheduler::new(ext.context.clone(), SchedulerConfig::default());
    ext.context.db.close().await;

    ext.set_now(at(4, 9));
    let report = scheduler.tick().await;
    assert_eq!(report.ran, Sweep::DAILY.to_vec());
    assert_eq!(report.failed, Sweep::DAILY.to_vec());
}

#[tokio::test]
async fn storage_failures_are_not_user_facing() {
    let ext = ContextExt::new().await;
    ext.context.db.close().await;
    let error = ext.context.start_period(ALICE, COMMUNITY).await.unwrap_err();
    assert!(matches!(error, Error::Storage(_)));
    assert!(!error.is_user_facing());
}

#[tokio::test]
async fn profiles_default_for_strangers() {
    let ext = ContextExt::new().await;
    assert_eq!(
        ext.context.streak_state("nobody", COMMUNITY).await.unwrap(),
        StreakState::default()
    );
    assert!(ext.context.active_period("nobody", COMMUNITY).await.unwrap().is_none());
    assert_eq!(ext.points("nobody").await, 0);

    let user = ext
        .context
        .upsert_user(ALICE, COMMUNITY, Some("Alice A."))
        .await
        .unwrap();
    assert_eq!(user.name(), "Alice A.");
    let user = ext.context.upsert_user(ALICE, COMMUNITY, None).await.unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Alice A."));
}

#[tokio::test]
async fn one_broken_community_does_not_block_the_others() {
    let mut ext = ContextExt::with_estimates(&[3]).await;
    ext.configure().await;
    let period_id = ext.period_with_goals(ALICE, &["Ship the API"]).await;
    ext.context.complete_goal(period_id, 1).await.unwrap();

    ext.context.start_period(BOB, "aaa-broken").await.unwrap();
    sqlx::query("UPDATE periods SET start_date = 'not a date' WHERE community_id = $1")
        .bind("aaa-broken")
        .execute(&*ext.context.db)
        .await
        .unwrap();
    ext.drain();

    ext.set_now(at(19, 9));
    let report = ext.context.sweep_all_ended_periods().await.unwrap();
    assert_eq!(report.finalized, 1);
    assert_eq!(report.failed, 1);
    assert!(report.leaderboard_posted);
    assert_eq!(ext.posts().len(), 1);
    assert!(ext.context.current_sprint(COMMUNITY, 10).await.unwrap().is_empty());

    let mut scheduler = Scheduler::new(ext.context.clone(), SchedulerConfig::default());
    let report = scheduler.tick().await;
    assert_eq!(report.ran, Sweep::DAILY.to_vec());
    assert_eq!(report.failed, vec![Sweep::EndedPeriods]);
}

#[tokio::test]
async fn challenge_length_is_bounded_by_the_calendar() {
    let ext = ContextExt::new().await;
    assert!(matches!(
        ext.context
            .create_challenge(COMMUNITY, ALICE, "Forever", None, u32::MAX, &[BOB], None)
            .await,
        Err(Error::InvalidState(_))
    ));
    assert!(ext.context.all_time(COMMUNITY, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn slow_sweep_is_cut_off_and_the_rest_still_run() {
    let ext = ContextExt::new().await;
    let mut scheduler = Scheduler::new(
        ext.context.clone(),
        SchedulerConfig {
            sweep_budget_secs: 2,
            ..Default::default()
        },
    );

    // The pool has a single connection: holding it stalls the first sweep
    // past its budget, releasing it lets the second one through.
    let tx = ext.context.db.begin().await.unwrap();
    let holder = tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_secs(3)).await;
        drop(tx);
    });

    ext.set_now(at(4, 9));
    let report = scheduler.tick().await;
    holder.await.unwrap();

    assert_eq!(report.ran, Sweep::DAILY.to_vec());
    assert_eq!(report.failed, vec![Sweep::DailyReminders]);
}

#[tokio::test]
async fn mrr_milestones_are_celebrated_once() {
    let mut ext = ContextExt::new().await;
    ext.context
        .set_mrr_destination(COMMUNITY, Some("mrr-chat"))
        .await
        .unwrap();

    let update = ext
        .context
        .record_mrr(ALICE, COMMUNITY, 80_000, None, Some("  "))
        .await
        .unwrap();
    assert_eq!(update.milestone, Some(50_000));
    assert_eq!(update.growth, None);
    assert_eq!(update.entry.currency, "USD");
    assert_eq!(update.entry.note, None);
    // Private members are tracked but not announced.
    assert!(ext.posts().is_empty());

    ext.context
        .set_mrr_visibility(ALICE, COMMUNITY, true)
        .await
        .unwrap();
    ext.set_now(at(5, 10));
    let update = ext
        .context
        .record_mrr(ALICE, COMMUNITY, 40_000, None, None)
        .await
        .unwrap();
    assert_eq!(update.milestone, None);
    assert_eq!(update.growth, Some(-50.0));

    ext.set_now(at(6, 10));
    let update = ext
        .context
        .record_mrr(ALICE, COMMUNITY, 90_000, None, None)
        .await
        .unwrap();
    assert_eq!(update.milestone, None);
    assert!(ext.posts().is_empty());

    ext.set_now(at(7, 10));
    let update = ext
        .context
        .record_mrr(ALICE, COMMUNITY, 120_000, Some("usd"), Some("annual plans"))
        .await
        .unwrap();
    assert_eq!(update.milestone, Some(100_000));
    assert!((update.growth.unwrap() - 33.33).abs() < 0.01);
    assert_eq!(update.entry.note.as_deref(), Some("annual plans"));

    let posts = ext.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0, "mrr-chat");
    assert!(posts[0].1.contains("alice just hit $1K MRR"));

    assert!(matches!(
        ext.context.record_mrr(ALICE, COMMUNITY, -1, None, None).await,
        Err(Error::InvalidState(_))
    ));
    assert_eq!(
        ext.context
            .mrr_history(ALICE, COMMUNITY, 12)
            .await
            .unwrap()
            .len(),
        4
    );
    // MRR is tracked next to the ledger, not in it.
    assert_eq!(ext.points(ALICE).await, 0);
}

#[tokio::test]
async fn mrr_leaderboard_uses_latest_public_entries() {
    let mut ext = ContextExt::new().await;
    ext.configure().await;
    for account in [ALICE, BOB] {
        ext.context
            .set_mrr_visibility(account, COMMUNITY, true)
            .await
            .unwrap();
    }
    ext.context
        .record_mrr(ALICE, COMMUNITY, 120_000, None, None)
        .await
        .unwrap();
    ext.set_now(at(4, 11));
    ext.context
        .record_mrr(BOB, COMMUNITY, 200_000, None, None)
        .await
        .unwrap();
    ext.context
        .record_mrr(CAROL, COMMUNITY, 500_000, None, None)
        .await
        .unwrap();
    ext.set_now(at(5, 10));
    ext.context
        .record_mrr(BOB, COMMUNITY, 30_000, Some("eur"), None)
        .await
        .unwrap();
    ext.context
        .record_mrr(ALICE, "elsewhere", 900_000, None, None)
        .await
        .unwrap();

    let board = ext.context.mrr_leaderboard(COMMUNITY, 10).await.unwrap();
    assert_eq!(
        board
            .iter()
            .map(|entry| (entry.place, entry.account_id.as_str(), entry.amount_cents))
            .collect::<Vec<_>>(),
        vec![(1, ALICE, 120_000), (2, BOB, 30_000)]
    );
    assert_eq!(board[1].currency, "EUR");
    assert_eq!(ext.context.mrr_leaderboard(COMMUNITY, 1).await.unwrap().len(), 1);
    assert_eq!(ext.context.community_mrr(COMMUNITY).await.unwrap(), 150_000);
    assert_eq!(ext.context.community_mrr("elsewhere").await.unwrap(), 0);

    let text = leaderboard::format_mrr_leaderboard(&board);
    assert!(text.starts_with(consts::MRR_TITLE));
    assert!(text.contains("🥇 alice - 1200.00 USD"));
    assert!(text.contains("🥈 bob - 300.00 EUR"));
    assert!(leaderboard::format_mrr_leaderboard(&[]).contains(consts::EMPTY_MRR));

    ext.drain();
    ext.set_now(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap().and_hms_opt(10, 0, 0).unwrap());
    assert_eq!(ext.context.monthly_digest().await.unwrap(), 1);
    let posts = ext.posts();
    assert_eq!(posts[0].0, DESTINATION);
    assert!(posts[0].1.contains(consts::MRR_TITLE));
    assert!(!posts[0].1.contains("carol"));
}

#[tokio::test]
async fn mrr_stats_compare_against_last_month() {
    let ext = ContextExt::new().await;
    ext.context
        .record_mrr(ALICE, COMMUNITY, 100_000, None, None)
        .await
        .unwrap();
    ext.set_now(NaiveDate::from_ymd_opt(2024, 4, 5).unwrap().and_hms_opt(10, 0, 0).unwrap());
    ext.context
        .record_mrr(ALICE, COMMUNITY, 150_000, None, None)
        .await
        .unwrap();

    let stats = ext.context.mrr_stats(ALICE, COMMUNITY).await.unwrap();
    assert_eq!(
        stats,
        crate::mrr::MrrStats {
            current_cents: 150_000,
            currency: Some("USD".to_string()),
            all_time_high_cents: 150_000,
            monthly_growth: Some(50.0),
            total_entries: 2,
            first_recorded_at: Some(at(4, 10)),
            is_public: false,
            milestones_hit: 3,
            next_milestone: Some(250_000),
        }
    );

    assert_eq!(ext.context.mrr_history(ALICE, COMMUNITY, 0).await.unwrap().len(), 1);
    let history = ext.context.mrr_history(ALICE, COMMUNITY, 2).await.unwrap();
    assert_eq!(
        history.iter().map(|entry| entry.amount_cents).collect::<Vec<_>>(),
        vec![150_000, 100_000]
    );

    assert!(ext.context.mrr_history(BOB, COMMUNITY, 12).await.unwrap().is_empty());
    assert_eq!(
        ext.context.mrr_stats(BOB, COMMUNITY).await.unwrap(),
        crate::mrr::MrrStats {
            next_milestone: Some(10_000),
            ..Default::default()
        }
    );
}
