use chrono::NaiveDateTime;

use super::*;

/// Points credited for every accepted check-in, on top of any milestone.
pub const CHECK_IN_BASE_POINTS: Points = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakMilestone {
    pub days: u32,
    pub bonus: Points,
}

pub const STREAK_MILESTONES: [StreakMilestone; 5] = [
    StreakMilestone { days: 7, bonus: 10 },
    StreakMilestone { days: 14, bonus: 25 },
    StreakMilestone { days: 30, bonus: 50 },
    StreakMilestone { days: 60, bonus: 100 },
    StreakMilestone { days: 90, bonus: 200 },
];

/// Bonus for a streak of exactly `streak` days.
pub fn milestone_bonus(streak: u32) -> Option<Points> {
    STREAK_MILESTONES
        .iter()
        .find(|milestone| milestone.days == streak)
        .map(|milestone| milestone.bonus)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInOutcome {
    /// The last check-in already happened on this calendar day.
    SameDay,
    Counted { bonus: Option<Points> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub current: u32,
    pub longest: u32,
    pub total_check_ins: u32,
    pub last_check_in: Option<NaiveDateTime>,
}

impl StreakState {
    /// Applies a check-in made at `moment`.
    ///
    /// The streak grows only when the previous check-in fell on the
    /// calendar day right before `moment`'s day; any other gap restarts it
    /// at 1. A second check-in on the same day leaves the state untouched.
    pub fn check_in(&mut self, moment: NaiveDateTime) -> CheckInOutcome {
        let today = moment.date();
        let yesterday = today.pred_opt();

        self.current = match self.last_check_in.map(|last| last.date()) {
            Some(last) if last == today => return CheckInOutcome::SameDay,
            Some(last) if Some(last) == yesterday => self.current + 1,
            _ => 1,
        };
        self.longest = self.longest.max(self.current);
        self.total_check_ins += 1;
        self.last_check_in = Some(moment);

        CheckInOutcome::Counted {
            bonus: milestone_bonus(self.current),
        }
    }

    /// Streak still alive but lost unless the member checks in today.
    pub fn is_at_risk(&self, now: NaiveDateTime) -> bool {
        self.current > 0
            && self.last_check_in.map(|last| last.date()) == now.date().pred_opt()
    }
}
