//! Account lifecycle: INIT, CONFIRM and REDEEM_MASTER

use tracing::{info, warn};

use crate::cache::keys;
use crate::db::schemas::UserDoc;
use crate::protocol::{
    ConfirmRequest, ConfirmResponse, ConfirmResult, InitRequest, InitResponse, InitResult,
    RedeemMasterRequest, RedeemMasterResponse, RedeemMasterResult,
};
use crate::rendezvous::validate_email;
use crate::server::AppState;
use crate::tokens::{generate_token, rotate_token};
use crate::types::Result;

/// Create an unconfirmed account and mail its confirmation token
pub async fn init(state: &AppState, req: InitRequest) -> Result<InitResponse> {
    let email = req.email.trim().to_lowercase();
    if !validate_email(&email) {
        warn!(email = %req.email, "INIT rejected: invalid email");
        return Ok(InitResponse {
            response: InitResult::Rejected,
        });
    }

    if !state.repos.users.find_by_email(&email).await?.is_empty() {
        return Ok(InitResponse {
            response: InitResult::EmailExists,
        });
    }

    let confirm = generate_token();
    state
        .repos
        .users
        .save(UserDoc::new(&email, confirm.clone()))
        .await?;
    state.mailer.send_confirmation(&email, &confirm).await?;

    info!(email = %email, "Account created");
    Ok(InitResponse {
        response: InitResult::Accepted,
    })
}

/// Exchange a confirmation token for a fresh master token
pub async fn confirm(state: &AppState, req: ConfirmRequest) -> Result<ConfirmResponse> {
    let rejected = ConfirmResponse {
        response: ConfirmResult::Rejected,
        token: None,
    };
    if req.token.is_empty() {
        return Ok(rejected);
    }

    let Some(mut user) = state
        .repos
        .users
        .find_by_confirm(&req.token)
        .await?
        .into_iter()
        .next()
    else {
        return Ok(rejected);
    };

    let previous = user.token.take();
    let token = rotate_token(previous.as_deref().unwrap_or_default());
    user.token = Some(token.clone());
    user.confirm = None;
    state.repos.users.save(user.clone()).await?;

    if let Some(previous) = previous {
        state.cache.invalidate(&keys::user_by_token(&previous)).await?;
    }

    info!(email = %user.email, "Master token issued");
    Ok(ConfirmResponse {
        response: ConfirmResult::Accepted,
        token: Some(token),
    })
}

/// Mail a new confirmation token; the master token rotates on CONFIRM
pub async fn redeem_master(
    state: &AppState,
    req: RedeemMasterRequest,
) -> Result<RedeemMasterResponse> {
    let rejected = RedeemMasterResponse {
        response: RedeemMasterResult::Rejected,
    };
    let email = req.email.trim().to_lowercase();
    if !validate_email(&email) {
        return Ok(rejected);
    }

    let Some(mut user) = state
        .repos
        .users
        .find_by_email(&email)
        .await?
        .into_iter()
        .next()
    else {
        return Ok(rejected);
    };

    let confirm = rotate_token(user.confirm.as_deref().unwrap_or_default());
    user.confirm = Some(confirm.clone());
    state.repos.users.save(user).await?;
    state.mailer.send_confirmation(&email, &confirm).await?;

    Ok(RedeemMasterResponse {
        response: RedeemMasterResult::Accepted,
    })
}
