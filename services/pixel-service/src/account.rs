use axum::{Json, extract::State};
use px_types::AccountId;
use px_wallet::WalletError;
use serde::Serialize;

use crate::{AppState, ApiResult, forbidden, internal_error, unavailable};

#[derive(Debug, Serialize)]
pub(crate) struct AccountResponse {
    account: Option<AccountId>,
}

pub(crate) async fn current_account(State(state): State<AppState>) -> Json<AccountResponse> {
    Json(AccountResponse {
        account: state.session.account(),
    })
}

/// Prompts the wallet for an account. The ledger signs with whatever this
/// stores.
pub(crate) async fn connect(State(state): State<AppState>) -> ApiResult<AccountResponse> {
    let account = state
        .session
        .request_connection()
        .await
        .map_err(|err| match err {
            WalletError::NoProvider => unavailable(&err.to_string()),
            WalletError::UserRejected => forbidden(&err.to_string()),
            WalletError::Provider(_) => internal_error(err),
        })?;

    Ok(Json(AccountResponse {
        account: Some(account),
    }))
}
