use focus_sprints_server::Context;
use rocket::{http::Status, serde::json::Json, State};

use super::types::{PeriodResponse, UserProfile};

#[get("/<community>/<account>")]
async fn get_user(
    context: &State<Context>,
    community: &str,
    account: &str,
) -> Result<Option<Json<UserProfile>>, Status> {
    let user = match context.db.get_user(account, community).await {
        Ok(Some(user)) => user,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::error!("Failed to get user {account} in {community}: {e}");
            return Err(Status::InternalServerError);
        }
    };
    let streak = context
        .streak_state(account, community)
        .await
        .map_err(|e| {
            tracing::error!("Failed to get streak of {account} in {community}: {e}");
            Status::InternalServerError
        })?;
    let now = context.now();
    let active_period = context
        .active_period(account, community)
        .await
        .map_err(|e| {
            tracing::error!("Failed to get active period of {account} in {community}: {e}");
            Status::InternalServerError
        })?
        .map(|period| PeriodResponse::new(period, now));

    Ok(Some(Json(UserProfile::new(user, streak, active_period))))
}

pub fn stage() -> rocket::fairing::AdHoc {
    rocket::fairing::AdHoc::on_ignite("Installing user entrypoints", |rocket| async {
        rocket.mount("/api/users", rocket::routes![get_user])
    })
}
