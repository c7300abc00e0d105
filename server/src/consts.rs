// Leaderboards
pub const ALL_TIME_TITLE: &str = "🏆 All-time leaderboard";
pub const SPRINT_TITLE: &str = "⚡ Current sprint leaderboard";
pub const SPRINT_RESULTS_TITLE: &str = "🏁 Focus sprint results are in!";
pub const STREAK_TITLE: &str = "🔥 Check-in streaks";
pub const EMPTY_LEADERBOARD: &str =
    "🌱 Nobody has earned points yet. Complete a goal to open the board! 🚀";
pub const EMPTY_STREAKS: &str = "🌱 No active streaks right now. Check in today to start one!";
pub const MRR_TITLE: &str = "💰 MRR leaderboard";
pub const EMPTY_MRR: &str = "🌱 No public MRR yet. Share yours to open the board!";
pub const MEDALS: [&str; 3] = ["🥇", "🥈", "🥉"];
pub const LEADERBOARD_LIMIT: u32 = 10;
pub const DIGEST_LEADERBOARD_LIMIT: u32 = 5;
pub const DIGEST_WINS_LIMIT: u32 = 10;

// Reminders
pub const DAILY_REMINDER_TITLE: &str = "⏰ Focus check: goals still waiting for you";
pub const INSUFFICIENT_GOALS_TITLE: &str =
    "📝 A strong sprint starts with a plan. These members could use a few more goals:";
pub const STREAK_ABSENCE_TITLE: &str =
    "👋 Haven't seen a check-in from you today. Keep the streak alive!";

// Digest
pub const MONTHLY_DIGEST_TITLE: &str = "📅 Monthly digest";
pub const DIGEST_WINS_TITLE: &str = "🎉 Wins from last month";
pub const DIGEST_TOP_TITLE: &str = "🏆 All-time top members";

// Generic failure shown to members for storage errors
pub const TRY_AGAIN: &str = "⚠️ Something went wrong on our side. Please try again in a moment.";
