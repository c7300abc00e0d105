pub mod challenges;
pub mod consts;
pub mod context;
pub mod db;
pub mod error;
pub mod events;
pub mod leaderboard;
pub mod ledger;
pub mod mrr;
pub mod periods;
pub mod reminders;
pub mod scheduler;
pub mod streaks;
pub mod wins;

#[cfg(test)]
mod tests;

pub use context::Context;
pub use error::{Error, Result};
