use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::account::UserAccount;
use crate::models::verification::{LeaderboardEntry, LeaderboardQuery};
use crate::models::voucher::Voucher;

/// GET /leaderboard?limit=: accounts ranked by total score.
pub async fn leaderboard(
    State(state): State<AppState>,
    query: Result<Query<LeaderboardQuery>, QueryRejection>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::MalformedBody(e.body_text()))?;
    Ok(Json(state.orchestrator.leaderboard(query.limit).await?))
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(actor_id): Path<String>,
) -> Result<Json<UserAccount>, ApiError> {
    Ok(Json(state.orchestrator.account(&actor_id).await?))
}

pub async fn list_vouchers(
    State(state): State<AppState>,
    Path(actor_id): Path<String>,
) -> Result<Json<Vec<Voucher>>, ApiError> {
    Ok(Json(state.orchestrator.vouchers(&actor_id).await?))
}
