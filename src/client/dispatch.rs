//! Fire-and-forget service calls.

use serde_json::{Map, Value};

use crate::client::auth::Phase;
use crate::client::registry::Registry;
use crate::client::transport::TransportSender;
use crate::protocol::Outbound;

/// A service invocation addressed to one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    /// Service domain, e.g. `light`.
    pub domain: String,
    /// Service name, e.g. `toggle`.
    pub service: String,
    /// Target entity id.
    pub target: String,
    /// Extra service parameters merged next to `entity_id`.
    pub params: Map<String, Value>,
}

impl ServiceCall {
    /// Creates a call with no extra parameters.
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            target: target.into(),
            params: Map::new(),
        }
    }

    /// Replaces the extra parameters.
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// The `service_data` object sent on the wire.
    ///
    /// `entity_id` always names the target, even if `params` carries one.
    pub fn service_data(&self) -> Map<String, Value> {
        let mut data = self.params.clone();
        data.insert("entity_id".to_string(), Value::String(self.target.clone()));
        data
    }

    fn into_message(self, id: u64) -> Outbound {
        let service_data = self.service_data();
        Outbound::CallService {
            id,
            domain: self.domain,
            service: self.service,
            service_data,
        }
    }
}

/// Sends `call` if the connection is authenticated.
///
/// The call consumes a fresh id but registers no completion, so the hub's
/// reply is dropped as unmatched.
///
/// # Returns
///
/// `true` if the message was queued on the transport. Before
/// authentication nothing is sent and a warning is logged.
pub fn dispatch(
    phase: Phase,
    registry: &Registry,
    sender: &TransportSender,
    call: ServiceCall,
) -> bool {
    if phase != Phase::Authenticated {
        tracing::warn!(
            %phase,
            domain = %call.domain,
            service = %call.service,
            target = %call.target,
            "dropping service call: connection is not authenticated"
        );
        return false;
    }

    registry.send_next(|id| {
        tracing::info!(
            id,
            "calling {}.{} on {}",
            call.domain,
            call.service,
            call.target
        );
        sender.send(&call.into_message(id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::Transport;
    use serde_json::json;

    #[test]
    fn test_service_data_includes_target() {
        let mut params = Map::new();
        params.insert("brightness".to_string(), json!(128));
        let call = ServiceCall::new("light", "turn_on", "light.kitchen").with_params(params);

        let data = call.service_data();
        assert_eq!(data["entity_id"], "light.kitchen");
        assert_eq!(data["brightness"], 128);
    }

    #[test]
    fn test_target_wins_over_params_entity_id() {
        let mut params = Map::new();
        params.insert("entity_id".to_string(), json!("light.other"));
        let call = ServiceCall::new("light", "toggle", "light.kitchen").with_params(params);
        assert_eq!(call.service_data()["entity_id"], "light.kitchen");
    }

    #[test]
    fn test_dispatch_before_auth_sends_nothing() {
        let (transport, _events, mut peer) = Transport::loopback();
        let registry = Registry::new();

        for phase in [Phase::Connecting, Phase::AwaitingAuth, Phase::Closed, Phase::Failed] {
            let sent = dispatch(
                phase,
                &registry,
                &transport.sender(),
                ServiceCall::new("light", "toggle", "light.kitchen"),
            );
            assert!(!sent, "{} must not dispatch", phase);
        }

        assert!(peer.drain_sent().is_empty());
        assert_eq!(registry.next_id(), 1, "no id consumed");
    }

    #[test]
    fn test_dispatch_consumes_id_without_registering() {
        let (transport, _events, mut peer) = Transport::loopback();
        let registry = Registry::new();
        registry.next_id();

        assert!(dispatch(
            Phase::Authenticated,
            &registry,
            &transport.sender(),
            ServiceCall::new("light", "toggle", "light.kitchen"),
        ));

        let sent = peer.drain_sent();
        assert_eq!(
            sent,
            vec![json!({
                "id": 2,
                "type": "call_service",
                "domain": "light",
                "service": "toggle",
                "service_data": {"entity_id": "light.kitchen"}
            })]
        );
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.next_id(), 3);
    }

    #[test]
    fn test_concurrent_dispatch_sends_ids_in_order() {
        let (transport, _events, mut peer) = Transport::loopback();
        let registry = Registry::new();

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let sender = transport.sender();
                let registry = &registry;
                scope.spawn(move || {
                    for _ in 0..250 {
                        let call = ServiceCall::new("light", "toggle", format!("light.l{worker}"));
                        assert!(dispatch(Phase::Authenticated, registry, &sender, call));
                    }
                });
            }
        });

        let ids: Vec<u64> = peer
            .drain_sent()
            .iter()
            .map(|sent| sent["id"].as_u64().expect("numeric id"))
            .collect();
        assert_eq!(ids.len(), 2000);
        assert!(
            ids.windows(2).all(|pair| pair[0] < pair[1]),
            "ids must reach the transport in increasing order"
        );
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&2000));
    }

    #[test]
    fn test_dispatch_on_closed_transport_reports_false() {
        let (mut transport, _events, _peer) = Transport::loopback();
        let sender = transport.sender();
        transport.close();

        let registry = Registry::new();
        assert!(!dispatch(
            Phase::Authenticated,
            &registry,
            &sender,
            ServiceCall::new("switch", "turn_off", "switch.fan"),
        ));
    }
}
