use axum::{
    extract::{Path, State},
    Json,
};

use crate::services::balance_cache::CachedBalance;
use crate::AppState;

/// Current cores balance. Served from the cache when warm; reports 0 while
/// the ledger is unreachable.
#[utoipa::path(
    get,
    path = "/balance/{user_id}",
    params(("user_id" = String, Path, description = "Account identifier")),
    responses(
        (status = 200, description = "Balance in cores", body = CachedBalance)
    ),
    tag = "Balances"
)]
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<CachedBalance> {
    let amount = state.balances.get(&user_id).await;
    Json(CachedBalance { amount })
}
