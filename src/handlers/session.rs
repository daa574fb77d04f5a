//! Session-scoped requests: registration, identity lookup, connection
//! listing and STATUS reports

use bson::oid::ObjectId;
use tracing::{debug, info, warn};

use super::{bound_daemon, daemon_by_token};
use crate::protocol::{
    ConnectionInfo, ConnectionsListRequest, ConnectionsListResponse, ConnectionsListResult,
    LookupIdentityRequest, LookupIdentityResponse, LookupIdentityResult, RegisterDaemonRequest,
    RegisterDaemonResponse, RegisterDaemonResult, StatusRequest, StatusResponse, StatusResult,
};
use crate::registry::ClientId;
use crate::rendezvous::validate_connection_name;
use crate::server::AppState;
use crate::tokens::identity_of;
use crate::types::Result;

/// Bind the socket to a daemon after checking its token and identity
pub async fn register_daemon(
    state: &AppState,
    client: ClientId,
    req: RegisterDaemonRequest,
) -> Result<RegisterDaemonResponse> {
    let rejected = RegisterDaemonResponse {
        response: RegisterDaemonResult::Rejected,
        daemon_name: None,
        email: None,
    };

    // taken before the token lookup so a redeem or delete racing it is seen below
    let mark = {
        let registry = state.registry.lock().await;
        if registry.daemon_of(client).is_some() {
            warn!(client = %client, "Re-registration refused");
            return Ok(rejected);
        }
        registry.revocation_mark()
    };
    if req.key.is_empty() || req.identity != identity_of(&req.key) {
        warn!(client = %client, "Registration refused: identity does not match key");
        return Ok(rejected);
    }

    let Some(daemon) = daemon_by_token(state, &req.token).await? else {
        return Ok(rejected);
    };
    let Some(daemon_id) = daemon._id else {
        return Ok(rejected);
    };
    let Some(user) = state.repos.users.find(daemon.user_id).await?.into_iter().next() else {
        return Ok(rejected);
    };

    let mut registry = state.registry.lock().await;
    // the socket may have closed, or registered concurrently, while we awaited
    if !registry.contains(client) || registry.daemon_of(client).is_some() {
        return Ok(rejected);
    }
    if registry.revoked_since(&daemon_id.to_hex(), mark) {
        warn!(client = %client, daemon = %daemon.name, "Registration refused: token revoked meanwhile");
        return Ok(rejected);
    }
    registry.set_identity(client, &req.identity, &req.key);
    registry.bind_daemon(
        client,
        &daemon_id.to_hex(),
        &daemon.name,
        &daemon.user_id.to_hex(),
        &user.email,
    );
    if let Some(entry) = registry.client_mut(client) {
        entry.hostname = req.hostname.clone();
        entry.version = req.version.clone();
        entry.set_internal_addresses(&req.internal_addresses);
    }
    drop(registry);

    info!(
        client = %client,
        daemon = %daemon.name,
        email = %user.email,
        hostname = %req.hostname,
        version = %req.version,
        "Daemon registered"
    );
    Ok(RegisterDaemonResponse {
        response: RegisterDaemonResult::Accepted,
        daemon_name: Some(daemon.name),
        email: Some(user.email),
    })
}

/// Owner email and key of a connected client presenting `identity`
pub async fn lookup_identity(
    state: &AppState,
    req: LookupIdentityRequest,
) -> Result<LookupIdentityResponse> {
    let registry = state.registry.lock().await;
    let found = registry.lookup_by_identity(&req.identity).and_then(|id| {
        let client = registry.client(id)?;
        let daemon = registry.daemon_of(id)?;
        Some((daemon.user_email.clone(), client.key.clone()))
    });

    Ok(match found {
        Some((email, key)) => LookupIdentityResponse {
            response: LookupIdentityResult::Accepted,
            email: Some(email),
            key,
        },
        None => LookupIdentityResponse {
            response: LookupIdentityResult::NotFound,
            email: None,
            key: None,
        },
    })
}

/// Connections the caller's daemon is attached to
pub async fn connections_list(
    state: &AppState,
    client: ClientId,
    _req: ConnectionsListRequest,
) -> Result<ConnectionsListResponse> {
    let Some(daemon_id) = bound_daemon(state, client).await else {
        return Ok(ConnectionsListResponse {
            response: ConnectionsListResult::Rejected,
            list: Vec::new(),
        });
    };

    let list = state
        .repos
        .connections
        .find_by_daemon(daemon_id)
        .await?
        .into_iter()
        .filter_map(|conn| {
            let acting_as = conn.role_of(daemon_id)?;
            Some(ConnectionInfo {
                name: conn.name,
                acting_as,
                connect_address: conn.connect_address,
                connect_port: conn.connect_port,
                listen_address: conn.listen_address,
                listen_port: conn.listen_port,
                encrypted: conn.encrypted,
                fixed: conn.fixed,
            })
        })
        .collect();

    Ok(ConnectionsListResponse {
        response: ConnectionsListResult::Accepted,
        list,
    })
}

/// Record a STATUS report and notify waiting clients when the connection
/// becomes ready
pub async fn status(
    state: &AppState,
    client: ClientId,
    req: StatusRequest,
) -> Result<StatusResponse> {
    let respond = |response| StatusResponse { response };

    let Some(daemon_id) = bound_daemon(state, client).await else {
        return Ok(respond(StatusResult::Rejected));
    };
    let Some(name) = validate_connection_name(&req.connection_name) else {
        warn!(client = %client, connection = %req.connection_name, "STATUS with invalid connection name");
        return Ok(respond(StatusResult::Rejected));
    };
    let name = name.to_string();

    let Some(connection) = state
        .repos
        .connections
        .find_by_name(&name)
        .await?
        .into_iter()
        .next()
    else {
        return Ok(respond(StatusResult::NotFound));
    };
    if connection.role_of(daemon_id) != Some(req.acting_as) {
        return Ok(respond(StatusResult::Rejected));
    }

    let mut registry = state.registry.lock().await;
    if !still_bound(&registry, client, daemon_id) {
        return Ok(respond(StatusResult::Rejected));
    }
    let ready = registry.report_status(
        &name,
        client,
        req.acting_as,
        req.active,
        req.connected,
        &req.internal_addresses,
    );
    drop(registry);

    if let Some(result) = ready {
        debug!(
            connection = %name,
            targets = result.targets.len(),
            "SERVER_AVAILABLE sent"
        );
    }
    Ok(respond(StatusResult::Accepted))
}

pub(crate) fn still_bound(
    registry: &crate::registry::Registry,
    client: ClientId,
    daemon_id: ObjectId,
) -> bool {
    registry
        .daemon_of(client)
        .is_some_and(|daemon| daemon.id == daemon_id.to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{ConnectionDoc, DaemonDoc, UserDoc};
    use crate::handlers::admin::redeem_daemon;
    use crate::handlers::fixtures::{fixture, fixture_with_users, Fixture, ScriptedUsers};
    use crate::protocol::{
        ActingAs, RedeemDaemonRequest, RedeemDaemonResult, ServerAvailable, ServerMessage,
    };
    use std::sync::Arc;

    const KEY: &str = "daemon-public-key";

    fn register_req(token: &str) -> RegisterDaemonRequest {
        RegisterDaemonRequest {
            token: token.into(),
            identity: identity_of(KEY),
            key: KEY.into(),
            hostname: "host".into(),
            version: "1.0".into(),
            internal_addresses: vec!["10.0.0.5".into()],
        }
    }

    async fn publish(f: &Fixture, user: &UserDoc, path: &str, server: &DaemonDoc, clients: &[&DaemonDoc]) {
        f.state
            .repos
            .connections
            .save(ConnectionDoc {
                user_id: user._id.unwrap(),
                path_id: ObjectId::new(),
                name: format!("{}?{}", user.email, path),
                server_daemon_id: server._id,
                client_daemon_ids: clients.iter().filter_map(|d| d._id).collect(),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    fn status_req(name: &str, acting_as: ActingAs, active: bool, addresses: &[&str]) -> StatusRequest {
        StatusRequest {
            connection_name: name.into(),
            acting_as,
            active,
            connected: 0,
            internal_addresses: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_register_daemon() {
        let f = fixture();
        let user = f.user("a@b.com").await;
        let daemon = f.daemon(&user, "laptop").await;
        let (client, _rx) = f.connect().await;

        let resp = register_daemon(&f.state, client, register_req(&daemon.token)).await.unwrap();
        assert_eq!(resp.response, RegisterDaemonResult::Accepted);
        assert_eq!(resp.daemon_name.as_deref(), Some("laptop"));
        assert_eq!(resp.email.as_deref(), Some("a@b.com"));

        let registry = f.state.registry.lock().await;
        assert_eq!(registry.lookup_by_identity(&identity_of(KEY)), Some(client));
        assert_eq!(registry.client(client).unwrap().internal_addresses, vec!["10.0.0.5".to_string()]);
        drop(registry);

        // one daemon per socket
        let again = register_daemon(&f.state, client, register_req(&daemon.token)).await.unwrap();
        assert_eq!(again.response, RegisterDaemonResult::Rejected);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_identity_and_token() {
        let f = fixture();
        let user = f.user("a@b.com").await;
        let daemon = f.daemon(&user, "laptop").await;
        let (client, _rx) = f.connect().await;

        let mut req = register_req(&daemon.token);
        req.identity = "0".repeat(64);
        assert_eq!(register_daemon(&f.state, client, req).await.unwrap().response, RegisterDaemonResult::Rejected);

        let req = register_req("unknown-token");
        assert_eq!(register_daemon(&f.state, client, req).await.unwrap().response, RegisterDaemonResult::Rejected);
        assert!(f.state.registry.lock().await.daemon_of(client).is_none());
    }

    #[tokio::test]
    async fn test_register_overlapping_redeem_is_rejected() {
        let users = Arc::new(ScriptedUsers::gated());
        let f = fixture_with_users(users.clone());
        let user = f.user("a@b.com").await;
        let daemon = f.daemon(&user, "laptop").await;
        let (client, _rx) = f.connect().await;

        // the redeem runs while registration is parked on the owner lookup
        let redeem = async {
            users.entered.notified().await;
            let resp = redeem_daemon(
                &f.state,
                RedeemDaemonRequest {
                    token: user.token.clone().unwrap(),
                    daemon_name: "laptop".into(),
                },
            )
            .await
            .unwrap();
            users.release();
            resp
        };
        let (registered, redeemed) = tokio::join!(
            register_daemon(&f.state, client, register_req(&daemon.token)),
            redeem
        );

        assert_eq!(redeemed.response, RedeemDaemonResult::Accepted);
        assert_eq!(registered.unwrap().response, RegisterDaemonResult::Rejected);
        assert!(f.state.registry.lock().await.daemon_of(client).is_none());
    }

    #[tokio::test]
    async fn test_lookup_identity() {
        let f = fixture();
        let user = f.user("a@b.com").await;
        let daemon = f.daemon(&user, "laptop").await;
        let (client, _rx) = f.connect().await;
        register_daemon(&f.state, client, register_req(&daemon.token)).await.unwrap();

        let req = || LookupIdentityRequest { identity: identity_of(KEY) };
        let resp = lookup_identity(&f.state, req()).await.unwrap();
        assert_eq!(resp.response, LookupIdentityResult::Accepted);
        assert_eq!(resp.email.as_deref(), Some("a@b.com"));
        assert_eq!(resp.key.as_deref(), Some(KEY));

        f.state.registry.lock().await.remove_client(client);
        let resp = lookup_identity(&f.state, req()).await.unwrap();
        assert_eq!(resp.response, LookupIdentityResult::NotFound);
    }

    #[tokio::test]
    async fn test_connections_list() {
        let f = fixture();
        let user = f.user("a@b.com").await;
        let server = f.daemon(&user, "server").await;
        let laptop = f.daemon(&user, "laptop").await;
        publish(&f, &user, "/one", &server, &[&laptop]).await;
        publish(&f, &user, "/two", &laptop, &[]).await;

        let (client, _rx) = f.connect().await;
        let unbound = connections_list(&f.state, client, ConnectionsListRequest {}).await.unwrap();
        assert_eq!(unbound.response, ConnectionsListResult::Rejected);

        f.bind(client, &user, &laptop).await;
        let mut resp = connections_list(&f.state, client, ConnectionsListRequest {}).await.unwrap();
        assert_eq!(resp.response, ConnectionsListResult::Accepted);
        resp.list.sort_by(|a, b| a.name.cmp(&b.name));
        let roles: Vec<(&str, ActingAs)> = resp.list.iter().map(|c| (c.name.as_str(), c.acting_as)).collect();
        assert_eq!(roles, vec![("a@b.com?/one", ActingAs::Client), ("a@b.com?/two", ActingAs::Server)]);
    }

    #[tokio::test]
    async fn test_status_checks_role_and_name() {
        let f = fixture();
        let user = f.user("x@y.com").await;
        let server = f.daemon(&user, "server").await;
        let laptop = f.daemon(&user, "laptop").await;
        publish(&f, &user, "/conn1", &server, &[&laptop]).await;

        let (a, _ra) = f.connect().await;
        let unbound = status(&f.state, a, status_req("x@y.com?/conn1", ActingAs::Server, true, &[])).await.unwrap();
        assert_eq!(unbound.response, StatusResult::Rejected);

        f.bind(a, &user, &server).await;
        let wrong_role = status(&f.state, a, status_req("x@y.com?/conn1", ActingAs::Client, true, &[])).await.unwrap();
        assert_eq!(wrong_role.response, StatusResult::Rejected);
        let invalid = status(&f.state, a, status_req("conn1", ActingAs::Server, true, &[])).await.unwrap();
        assert_eq!(invalid.response, StatusResult::Rejected);
        let missing = status(&f.state, a, status_req("x@y.com?/nope", ActingAs::Server, true, &[])).await.unwrap();
        assert_eq!(missing.response, StatusResult::NotFound);
    }

    #[tokio::test]
    async fn test_status_announces_server_once() {
        let f = fixture();
        let user = f.user("x@y.com").await;
        let server = f.daemon(&user, "server").await;
        let laptop = f.daemon(&user, "laptop").await;
        publish(&f, &user, "/conn1", &server, &[&laptop]).await;

        let (a, mut ra) = f.connect().await;
        let (b, mut rb) = f.connect().await;
        f.bind(a, &user, &server).await;
        f.bind(b, &user, &laptop).await;

        let name = "x@y.com?/conn1";
        let resp = status(&f.state, a, status_req(name, ActingAs::Server, true, &["10.0.0.5"])).await.unwrap();
        assert_eq!(resp.response, StatusResult::Accepted);
        let resp = status(&f.state, b, status_req(name, ActingAs::Client, true, &[])).await.unwrap();
        assert_eq!(resp.response, StatusResult::Accepted);

        let push = rb.try_recv().expect("SERVER_AVAILABLE");
        assert_eq!(
            push.message,
            ServerMessage::ServerAvailable(ServerAvailable {
                connection_name: name.into(),
                daemon_name: "x@y.com?server".into(),
                internal_addresses: vec!["10.0.0.5".into()],
            })
        );
        assert!(ra.try_recv().is_err());

        // repeated server report without a fresh client report stays quiet
        status(&f.state, a, status_req(name, ActingAs::Server, true, &["10.0.0.5"])).await.unwrap();
        assert!(rb.try_recv().is_err());
    }
}
