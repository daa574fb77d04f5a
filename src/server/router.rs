//! Static dispatch of decoded requests to their handlers

use tracing::{debug, error};

use crate::handlers::{account, admin, punch, session};
use crate::protocol::{Inbound, Outbound, Request, ServerMessage};
use crate::registry::ClientId;
use crate::server::AppState;
use crate::types::Result;

/// Handle one inbound frame for `client` and queue its reply
///
/// Frames from clients that are no longer registered are dropped. Handler
/// failures are logged and produce no reply; the peer times out and retries.
pub async fn route(state: &AppState, client: ClientId, inbound: Inbound) {
    if !state.registry.lock().await.contains(client) {
        debug!(client = %client, "Dropping frame from departed client");
        return;
    }

    let kind = inbound.request.kind();
    match dispatch(state, client, inbound.request).await {
        Ok(Some(message)) => {
            let reply = Outbound::reply(inbound.message_id, message);
            if !state.registry.lock().await.send(client, reply) {
                debug!(client = %client, %kind, "Reply dropped, client gone");
            }
        }
        Ok(None) => {}
        Err(e) => {
            error!(client = %client, %kind, error = ?e, "Handler failed: {}", e);
        }
    }
}

async fn dispatch(
    state: &AppState,
    client: ClientId,
    request: Request,
) -> Result<Option<ServerMessage>> {
    let message = match request {
        Request::Init(req) => ServerMessage::Init(account::init(state, req).await?),
        Request::Confirm(req) => ServerMessage::Confirm(account::confirm(state, req).await?),
        Request::RedeemMaster(req) => {
            ServerMessage::RedeemMaster(account::redeem_master(state, req).await?)
        }
        Request::Create(req) => ServerMessage::Create(admin::create(state, req).await?),
        Request::Delete(req) => ServerMessage::Delete(admin::delete(state, req).await?),
        Request::RedeemDaemon(req) => {
            ServerMessage::RedeemDaemon(admin::redeem_daemon(state, req).await?)
        }
        Request::RedeemPath(req) => {
            ServerMessage::RedeemPath(admin::redeem_path(state, req).await?)
        }
        Request::Attach(req) => ServerMessage::Attach(admin::attach(state, req).await?),
        Request::Detach(req) => ServerMessage::Detach(admin::detach(state, req).await?),
        Request::RegisterDaemon(req) => {
            ServerMessage::RegisterDaemon(session::register_daemon(state, client, req).await?)
        }
        Request::LookupIdentity(req) => {
            ServerMessage::LookupIdentity(session::lookup_identity(state, req).await?)
        }
        Request::ConnectionsList(req) => {
            ServerMessage::ConnectionsList(session::connections_list(state, client, req).await?)
        }
        Request::Status(req) => ServerMessage::Status(session::status(state, client, req).await?),
        Request::Punch(req) => ServerMessage::Punch(punch::punch(state, client, req).await?),
        Request::AddressResponse(resp) => {
            punch::address_response(state, client, resp).await?;
            return Ok(None);
        }
    };
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::fixtures::{fixture, fixture_with_users, ScriptedUsers};
    use std::sync::Arc;
    use crate::protocol::{InitRequest, InitResult, LookupIdentityRequest, MessageId};

    #[tokio::test]
    async fn test_reply_echoes_message_id() {
        let f = fixture();
        let (client, mut rx) = f.connect().await;
        let inbound = Inbound {
            message_id: Some(MessageId::from(42u64)),
            request: Request::Init(InitRequest { email: "a@b.com".into() }),
        };

        route(&f.state, client, inbound).await;
        let reply = rx.try_recv().expect("reply");
        assert_eq!(reply.message_id, Some(MessageId::from(42u64)));
        match reply.message {
            ServerMessage::Init(resp) => assert_eq!(resp.response, InitResult::Accepted),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_departed_client_is_ignored() {
        let f = fixture();
        let inbound = Inbound {
            message_id: None,
            request: Request::Init(InitRequest { email: "a@b.com".into() }),
        };
        route(&f.state, ClientId::new(u64::MAX), inbound).await;
        assert_eq!(f.mailer.count(), 0);
        assert!(f
            .state
            .repos
            .users
            .find_by_email("a@b.com")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_lookup_needs_no_binding() {
        let f = fixture();
        let (client, mut rx) = f.connect().await;
        let inbound = Inbound {
            message_id: Some(MessageId::from("q1")),
            request: Request::LookupIdentity(LookupIdentityRequest { identity: "ab".into() }),
        };
        route(&f.state, client, inbound).await;
        assert!(matches!(rx.try_recv().map(|o| o.message), Ok(ServerMessage::LookupIdentity(_))));
    }

    #[tokio::test]
    async fn test_handler_failure_sends_nothing_and_session_survives() {
        let f = fixture_with_users(Arc::new(ScriptedUsers::broken()));
        let (client, mut rx) = f.connect().await;

        let failing = Inbound {
            message_id: Some(MessageId::from("q1")),
            request: Request::Init(InitRequest { email: "a@b.com".into() }),
        };
        route(&f.state, client, failing).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(f.mailer.count(), 0);

        let next = Inbound {
            message_id: Some(MessageId::from("q2")),
            request: Request::LookupIdentity(LookupIdentityRequest { identity: "ab".into() }),
        };
        route(&f.state, client, next).await;
        let reply = rx.try_recv().expect("reply after a failed request");
        assert_eq!(reply.message_id, Some(MessageId::from("q2")));
        assert!(f.state.registry.lock().await.contains(client));
    }
}
