use focus_sprints_server::Context;
use rocket::{http::Status, serde::json::Json, State};

use super::types::{LeaderboardResponse, MrrLeaderboardResponse, StreakLeaderboardResponse};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 200;

fn limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[get("/<community>/all-time?<limit>")]
async fn get_all_time(
    context: &State<Context>,
    community: &str,
    limit: Option<u32>,
) -> Result<Json<Vec<LeaderboardResponse>>, Status> {
    match context.all_time(community, self::limit(limit)).await {
        Ok(entries) => Ok(Json(entries.into_iter().map(Into::into).collect())),
        Err(e) => {
            tracing::error!("Failed to get all-time leaderboard for {community}: {e}");
            Err(Status::InternalServerError)
        }
    }
}

#[get("/<community>/sprint?<limit>")]
async fn get_sprint(
    context: &State<Context>,
    community: &str,
    limit: Option<u32>,
) -> Result<Json<Vec<LeaderboardResponse>>, Status> {
    match context.current_sprint(community, self::limit(limit)).await {
        Ok(entries) => Ok(Json(entries.into_iter().map(Into::into).collect())),
        Err(e) => {
            tracing::error!("Failed to get sprint leaderboard for {community}: {e}");
            Err(Status::InternalServerError)
        }
    }
}

#[get("/<community>/streaks?<limit>")]
async fn get_streaks(
    context: &State<Context>,
    community: &str,
    limit: Option<u32>,
) -> Result<Json<Vec<StreakLeaderboardResponse>>, Status> {
    match context.streak_leaderboard(community, self::limit(limit)).await {
        Ok(entries) => Ok(Json(entries.into_iter().map(Into::into).collect())),
        Err(e) => {
            tracing::error!("Failed to get streak leaderboard for {community}: {e}");
            Err(Status::InternalServerError)
        }
    }
}

#[get("/<community>/mrr?<limit>")]
async fn get_mrr(
    context: &State<Context>,
    community: &str,
    limit: Option<u32>,
) -> Result<Json<Vec<MrrLeaderboardResponse>>, Status> {
    match context.mrr_leaderboard(community, self::limit(limit)).await {
        Ok(entries) => Ok(Json(entries.into_iter().map(Into::into).collect())),
        Err(e) => {
            tracing::error!("Failed to get MRR leaderboard for {community}: {e}");
            Err(Status::InternalServerError)
        }
    }
}

pub fn stage() -> rocket::fairing::AdHoc {
    rocket::fairing::AdHoc::on_ignite("Installing leaderboard entrypoints", |rocket| async {
        rocket.mount(
            "/api/leaderboard",
            rocket::routes![get_all_time, get_sprint, get_streaks, get_mrr],
        )
    })
}
