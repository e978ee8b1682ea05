//! Wallet endpoints
//!
//!   GET  /wallet            -> connection state and session
//!   POST /wallet/connect    -> open a session with a provider
//!   POST /wallet/disconnect -> clear the session

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState, api_error};
use crate::wallet::{ConnectionState, WalletError, WalletSession};

#[derive(Debug, Deserialize)]
pub struct ConnectBody {
    pub provider_id: String,
}

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub state: ConnectionState,
    pub session: Option<WalletSession>,
    pub providers: Vec<String>,
}

pub async fn get_wallet(State(state): State<ApiState>) -> Json<WalletResponse> {
    Json(WalletResponse {
        state: state.wallet.state().await,
        session: state.wallet.session().await,
        providers: state.wallet.provider_ids(),
    })
}

pub async fn connect_wallet(
    State(state): State<ApiState>,
    Json(body): Json<ConnectBody>,
) -> Result<Json<WalletSession>, ApiError> {
    state
        .wallet
        .connect(&body.provider_id)
        .await
        .map(Json)
        .map_err(|e| api_error(wallet_status(&e), e.to_string()))
}

pub async fn disconnect_wallet(State(state): State<ApiState>) -> Json<WalletResponse> {
    state.wallet.disconnect().await;
    get_wallet(State(state)).await
}

fn wallet_status(error: &WalletError) -> StatusCode {
    match error {
        WalletError::NotConnected => StatusCode::UNAUTHORIZED,
        WalletError::ProviderUnavailable(_) => StatusCode::NOT_FOUND,
        WalletError::ConnectionRejected(_) | WalletError::SigningRejected(_) => {
            StatusCode::FORBIDDEN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_status_mapping() {
        assert_eq!(
            wallet_status(&WalletError::ProviderUnavailable("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            wallet_status(&WalletError::ConnectionRejected("no".into())),
            StatusCode::FORBIDDEN
        );
    }
}
