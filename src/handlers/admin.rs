//! Daemon and path administration
//!
//! All requests here authenticate with the owner's master token.

use bson::oid::ObjectId;
use tracing::{debug, info};

use super::{disconnect_daemon, user_by_token};
use crate::cache::keys;
use crate::db::schemas::{ConnectionDoc, DaemonDoc, PathDoc, UserDoc};
use crate::protocol::{
    ActingAs, AttachRequest, AttachResponse, AttachResult, CreateRequest, CreateResponse,
    CreateResult, CreateTarget, DeleteRequest, DeleteResponse, DeleteResult, DeleteTarget,
    DetachRequest, DetachResponse, DetachResult, PathSpec, RedeemDaemonRequest,
    RedeemDaemonResponse, RedeemDaemonResult, RedeemPathRequest, RedeemPathResponse,
    RedeemPathResult,
};
use crate::rendezvous::{is_within, validate_connection_name, validate_daemon_name, validate_path};
use crate::server::AppState;
use crate::tokens::{generate_token, rotate_token};
use crate::types::{Result, TrackerError};

fn user_id(user: &UserDoc) -> Result<ObjectId> {
    user._id
        .ok_or_else(|| TrackerError::Internal(format!("user {} has no id", user.email)))
}

fn create_response(response: CreateResult, token: Option<String>) -> CreateResponse {
    CreateResponse { response, token }
}

pub async fn create(state: &AppState, req: CreateRequest) -> Result<CreateResponse> {
    let Some(user) = user_by_token(state, &req.token).await? else {
        return Ok(create_response(CreateResult::Rejected, None));
    };

    match req.target {
        CreateTarget::Daemon { name } => create_daemon(state, &user, &name).await,
        CreateTarget::Path(params) => create_path(state, &user, params).await,
    }
}

async fn create_daemon(state: &AppState, user: &UserDoc, name: &str) -> Result<CreateResponse> {
    if !validate_daemon_name(name) {
        return Ok(create_response(CreateResult::Rejected, None));
    }
    let user_id = user_id(user)?;
    if !state
        .repos
        .daemons
        .find_by_user_and_name(user_id, name)
        .await?
        .is_empty()
    {
        return Ok(create_response(CreateResult::Rejected, None));
    }

    let token = generate_token();
    state
        .repos
        .daemons
        .save(DaemonDoc::new(user_id, name, token.clone()))
        .await?;

    info!(email = %user.email, daemon = name, "Daemon created");
    Ok(create_response(CreateResult::Accepted, Some(token)))
}

async fn create_path(state: &AppState, user: &UserDoc, params: PathSpec) -> Result<CreateResponse> {
    if !validate_path(&params.path) {
        return Ok(create_response(CreateResult::InvalidPath, None));
    }
    let user_id = user_id(user)?;
    if !state
        .repos
        .paths
        .find_by_user_and_path(user_id, &params.path)
        .await?
        .is_empty()
    {
        return Ok(create_response(CreateResult::PathExists, None));
    }

    // optional daemon attached in the same step
    let attach = match &params.daemon_name {
        Some(daemon_name) => {
            let daemon = state
                .repos
                .daemons
                .find_by_user_and_name(user_id, daemon_name)
                .await?
                .into_iter()
                .next();
            match (daemon.and_then(|d| d._id), params.acting_as) {
                (Some(daemon_id), Some(acting_as)) => Some((daemon_id, acting_as)),
                _ => return Ok(create_response(CreateResult::Rejected, None)),
            }
        }
        None => None,
    };

    let token = generate_token();
    let path_id = state
        .repos
        .paths
        .save(PathDoc::new(user_id, &params.path, token.clone()))
        .await?;

    let mut connection = ConnectionDoc {
        user_id,
        path_id,
        name: format!("{}?{}", user.email, params.path),
        connect_address: params.connect_address,
        connect_port: params.connect_port,
        listen_address: params.listen_address,
        listen_port: params.listen_port,
        encrypted: params.encrypted,
        fixed: params.fixed,
        ..Default::default()
    };
    match attach {
        Some((daemon_id, ActingAs::Server)) => connection.server_daemon_id = Some(daemon_id),
        Some((daemon_id, ActingAs::Client)) => connection.client_daemon_ids.push(daemon_id),
        None => {}
    }
    state.repos.connections.save(connection).await?;

    info!(email = %user.email, path = %params.path, "Path created");
    Ok(create_response(CreateResult::Accepted, Some(token)))
}

pub async fn delete(state: &AppState, req: DeleteRequest) -> Result<DeleteResponse> {
    let Some(user) = user_by_token(state, &req.token).await? else {
        return Ok(DeleteResponse {
            response: DeleteResult::Rejected,
        });
    };

    let response = match req.target {
        DeleteTarget::Daemon { name } => delete_daemon(state, &user, &name).await?,
        DeleteTarget::Path { path } => delete_path(state, &user, &path).await?,
    };
    Ok(DeleteResponse { response })
}

async fn delete_daemon(state: &AppState, user: &UserDoc, name: &str) -> Result<DeleteResult> {
    let user_id = user_id(user)?;
    let Some(daemon) = state
        .repos
        .daemons
        .find_by_user_and_name(user_id, name)
        .await?
        .into_iter()
        .next()
    else {
        return Ok(DeleteResult::NotFound);
    };
    let Some(daemon_id) = daemon._id else {
        return Ok(DeleteResult::NotFound);
    };

    for mut connection in state.repos.connections.find_by_daemon(daemon_id).await? {
        if connection.detach(daemon_id) {
            state.repos.connections.save(connection).await?;
        }
    }
    state.repos.daemons.delete(daemon_id).await?;
    state
        .cache
        .invalidate(&keys::daemon_by_token(&daemon.token))
        .await?;

    let closed = disconnect_daemon(state, daemon_id).await;
    info!(email = %user.email, daemon = name, closed, "Daemon deleted");
    Ok(DeleteResult::Accepted)
}

/// Delete a path together with every path below it and their connections
async fn delete_path(state: &AppState, user: &UserDoc, path: &str) -> Result<DeleteResult> {
    if !validate_path(path) {
        return Ok(DeleteResult::InvalidPath);
    }
    let user_id = user_id(user)?;
    if state
        .repos
        .paths
        .find_by_user_and_path(user_id, path)
        .await?
        .is_empty()
    {
        return Ok(DeleteResult::NotFound);
    }

    let doomed: Vec<PathDoc> = state
        .repos
        .paths
        .find_by_user(user_id)
        .await?
        .into_iter()
        .filter(|candidate| is_within(&candidate.path, path))
        .collect();

    for doc in &doomed {
        let Some(path_id) = doc._id else { continue };
        for connection in state.repos.connections.find_by_path(path_id).await? {
            if let Some(id) = connection._id {
                state.repos.connections.delete(id).await?;
            }
        }
        state.repos.paths.delete(path_id).await?;
        debug!(path = %doc.path, "Path removed");
    }

    info!(email = %user.email, path, removed = doomed.len(), "Path deleted");
    Ok(DeleteResult::Accepted)
}

/// Issue a new daemon token and close every session using the old one
pub async fn redeem_daemon(
    state: &AppState,
    req: RedeemDaemonRequest,
) -> Result<RedeemDaemonResponse> {
    let Some(user) = user_by_token(state, &req.token).await? else {
        return Ok(RedeemDaemonResponse {
            response: RedeemDaemonResult::Rejected,
            token: None,
        });
    };
    let Some(mut daemon) = state
        .repos
        .daemons
        .find_by_user_and_name(user_id(&user)?, &req.daemon_name)
        .await?
        .into_iter()
        .next()
    else {
        return Ok(RedeemDaemonResponse {
            response: RedeemDaemonResult::NotFound,
            token: None,
        });
    };
    let Some(daemon_id) = daemon._id else {
        return Ok(RedeemDaemonResponse {
            response: RedeemDaemonResult::NotFound,
            token: None,
        });
    };

    let previous = std::mem::take(&mut daemon.token);
    let token = rotate_token(&previous);
    daemon.token = token.clone();
    state.repos.daemons.save(daemon).await?;
    state
        .cache
        .invalidate(&keys::daemon_by_token(&previous))
        .await?;

    let closed = disconnect_daemon(state, daemon_id).await;
    info!(email = %user.email, daemon = %req.daemon_name, closed, "Daemon token redeemed");
    Ok(RedeemDaemonResponse {
        response: RedeemDaemonResult::Accepted,
        token: Some(token),
    })
}

pub async fn redeem_path(state: &AppState, req: RedeemPathRequest) -> Result<RedeemPathResponse> {
    let respond = |response, token| RedeemPathResponse { response, token };

    let Some(user) = user_by_token(state, &req.token).await? else {
        return Ok(respond(RedeemPathResult::Rejected, None));
    };
    if !validate_path(&req.path) {
        return Ok(respond(RedeemPathResult::InvalidPath, None));
    }
    let Some(mut path) = state
        .repos
        .paths
        .find_by_user_and_path(user_id(&user)?, &req.path)
        .await?
        .into_iter()
        .next()
    else {
        return Ok(respond(RedeemPathResult::NotFound, None));
    };

    let token = rotate_token(&path.token);
    path.token = token.clone();
    state.repos.paths.save(path).await?;

    info!(email = %user.email, path = %req.path, "Path token redeemed");
    Ok(respond(RedeemPathResult::Accepted, Some(token)))
}

/// Attach one of the caller's daemons to a connection in a role
pub async fn attach(state: &AppState, req: AttachRequest) -> Result<AttachResponse> {
    let respond = |response| AttachResponse { response };

    let Some(user) = user_by_token(state, &req.token).await? else {
        return Ok(respond(AttachResult::Rejected));
    };
    let Some(name) = validate_connection_name(&req.connection_name) else {
        return Ok(respond(AttachResult::InvalidPath));
    };
    let user_id = user_id(&user)?;

    let Some(daemon_id) = state
        .repos
        .daemons
        .find_by_user_and_name(user_id, &req.daemon_name)
        .await?
        .into_iter()
        .next()
        .and_then(|daemon| daemon._id)
    else {
        return Ok(respond(AttachResult::NotFound));
    };
    let Some(mut connection) = state
        .repos
        .connections
        .find_by_name(&name.to_string())
        .await?
        .into_iter()
        .next()
    else {
        return Ok(respond(AttachResult::NotFound));
    };

    // foreign connections need the owner's path token
    if connection.user_id != user_id {
        let path = state.repos.paths.find(connection.path_id).await?.into_iter().next();
        let authorized = match (&req.path_token, path) {
            (Some(given), Some(path)) => !given.is_empty() && *given == path.token,
            _ => false,
        };
        if !authorized {
            return Ok(respond(AttachResult::Rejected));
        }
    }

    match req.acting_as {
        ActingAs::Server => {
            if connection
                .server_daemon_id
                .is_some_and(|current| current != daemon_id)
            {
                return Ok(respond(AttachResult::Rejected));
            }
            connection.client_daemon_ids.retain(|id| *id != daemon_id);
            connection.server_daemon_id = Some(daemon_id);
        }
        ActingAs::Client => {
            if connection.server_daemon_id == Some(daemon_id) {
                connection.server_daemon_id = None;
            }
            if !connection.client_daemon_ids.contains(&daemon_id) {
                connection.client_daemon_ids.push(daemon_id);
            }
        }
    }
    state.repos.connections.save(connection).await?;

    info!(
        connection = %name,
        daemon = %req.daemon_name,
        acting_as = ?req.acting_as,
        "Daemon attached"
    );
    Ok(respond(AttachResult::Accepted))
}

pub async fn detach(state: &AppState, req: DetachRequest) -> Result<DetachResponse> {
    let respond = |response| DetachResponse { response };

    let Some(user) = user_by_token(state, &req.token).await? else {
        return Ok(respond(DetachResult::Rejected));
    };
    let Some(name) = validate_connection_name(&req.connection_name) else {
        return Ok(respond(DetachResult::InvalidPath));
    };

    let Some(daemon_id) = state
        .repos
        .daemons
        .find_by_user_and_name(user_id(&user)?, &req.daemon_name)
        .await?
        .into_iter()
        .next()
        .and_then(|daemon| daemon._id)
    else {
        return Ok(respond(DetachResult::NotFound));
    };
    let Some(mut connection) = state
        .repos
        .connections
        .find_by_name(&name.to_string())
        .await?
        .into_iter()
        .next()
    else {
        return Ok(respond(DetachResult::NotFound));
    };

    if !connection.detach(daemon_id) {
        return Ok(respond(DetachResult::NotFound));
    }
    state.repos.connections.save(connection).await?;

    info!(connection = %name, daemon = %req.daemon_name, "Daemon detached");
    Ok(respond(DetachResult::Accepted))
}
