//! PUNCH_REQUEST and ADDRESS_RESPONSE

use tracing::{debug, info};

use super::bound_daemon;
use super::session::still_bound;
use crate::protocol::{
    ActingAs, AddressResponse, AddressResult, PunchRequest, PunchResponse, PunchResult,
};
use crate::registry::ClientId;
use crate::rendezvous::validate_connection_name;
use crate::server::AppState;
use crate::types::Result;

/// Start a hole-punch between the caller (client side) and the connection's
/// current server
pub async fn punch(state: &AppState, client: ClientId, req: PunchRequest) -> Result<PunchResponse> {
    let respond = |response| PunchResponse { response };

    let Some(daemon_id) = bound_daemon(state, client).await else {
        return Ok(respond(PunchResult::Rejected));
    };
    let Some(name) = validate_connection_name(&req.connection_name) else {
        return Ok(respond(PunchResult::Rejected));
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
        return Ok(respond(PunchResult::NotFound));
    };
    if connection.role_of(daemon_id) != Some(ActingAs::Client) {
        return Ok(respond(PunchResult::Rejected));
    }

    let mut registry = state.registry.lock().await;
    if !still_bound(&registry, client, daemon_id) {
        return Ok(respond(PunchResult::Rejected));
    }
    let Some(server) = registry.waiting.server_of(&name) else {
        return Ok(respond(PunchResult::NotFound));
    };
    if server == client {
        return Ok(respond(PunchResult::Rejected));
    }
    let Some(ids) = registry.start_punch(&name, server, client, state.settings.punch_timeout) else {
        return Ok(respond(PunchResult::NotFound));
    };
    drop(registry);

    info!(
        connection = %name,
        server = %server,
        client = %client,
        server_request = %ids.server_request_id,
        client_request = %ids.client_request_id,
        "Punch started"
    );
    Ok(respond(PunchResult::Accepted))
}

/// A daemon's answer to ADDRESS_REQUEST; a refusal abandons the pair
pub async fn address_response(
    state: &AppState,
    client: ClientId,
    resp: AddressResponse,
) -> Result<()> {
    match resp.response {
        AddressResult::Accepted => {
            debug!(client = %client, request_id = %resp.request_id, "Probe acknowledged");
        }
        AddressResult::Rejected => {
            let cancelled = state
                .registry
                .lock()
                .await
                .cancel_pair(&resp.request_id, client);
            debug!(client = %client, request_id = %resp.request_id, cancelled, "Probe refused");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::ConnectionDoc;
    use crate::handlers::fixtures::fixture;
    use crate::protocol::ServerMessage;
    use bson::oid::ObjectId;

    const NAME: &str = "x@y.com?/conn1";

    #[tokio::test]
    async fn test_punch_pairs_client_with_waiting_server() {
        let f = fixture();
        let user = f.user("x@y.com").await;
        let server = f.daemon(&user, "server").await;
        let laptop = f.daemon(&user, "laptop").await;
        f.state
            .repos
            .connections
            .save(ConnectionDoc {
                user_id: user._id.unwrap(),
                path_id: ObjectId::new(),
                name: NAME.into(),
                server_daemon_id: server._id,
                client_daemon_ids: vec![laptop._id.unwrap()],
                ..Default::default()
            })
            .await
            .unwrap();

        let (a, mut ra) = f.connect().await;
        let (b, mut rb) = f.connect().await;
        f.bind(a, &user, &server).await;
        f.bind(b, &user, &laptop).await;

        let req = || PunchRequest { connection_name: NAME.into() };
        // no server has reported yet
        assert_eq!(punch(&f.state, b, req()).await.unwrap().response, PunchResult::NotFound);

        f.state
            .registry
            .lock()
            .await
            .update_connection(NAME, a, ActingAs::Server, true, 0, &[]);

        // only the client side may punch
        assert_eq!(punch(&f.state, a, req()).await.unwrap().response, PunchResult::Rejected);
        assert_eq!(punch(&f.state, b, req()).await.unwrap().response, PunchResult::Accepted);

        let server_id = match ra.try_recv().map(|o| o.message) {
            Ok(ServerMessage::AddressRequest(r)) => r.request_id,
            other => panic!("unexpected {other:?}"),
        };
        let client_id = match rb.try_recv().map(|o| o.message) {
            Ok(ServerMessage::AddressRequest(r)) => r.request_id,
            other => panic!("unexpected {other:?}"),
        };
        assert_ne!(server_id, client_id);
        assert_eq!(f.state.registry.lock().await.pending_pairs(), 1);

        // a refusal from the server side abandons the attempt
        address_response(
            &f.state,
            a,
            AddressResponse { request_id: server_id, response: AddressResult::Rejected },
        )
        .await
        .unwrap();
        assert_eq!(f.state.registry.lock().await.pending_pairs(), 0);
    }

    #[tokio::test]
    async fn test_punch_requires_bound_client() {
        let f = fixture();
        let (client, _rx) = f.connect().await;
        let resp = punch(&f.state, client, PunchRequest { connection_name: NAME.into() })
            .await
            .unwrap();
        assert_eq!(resp.response, PunchResult::Rejected);
    }
}
