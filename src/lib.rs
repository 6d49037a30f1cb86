//! hublink library
//!
//! Real-time state synchronization with a home-automation hub over a single
//! WebSocket. The client authenticates, fetches the full entity list, keeps
//! it fresh by re-fetching on every `state_changed` notification, and sends
//! fire-and-forget service calls.
//!
//! # Example
//!
//! ```no_run
//! use hublink::client::HubClient;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), hublink::client::ClientError> {
//! let mut client = HubClient::new(Duration::from_secs(10));
//! let mut snapshots = client.snapshots().expect("receiver taken once");
//! client
//!     .connect("ws://homeassistant.local:8123/api/websocket", "token")
//!     .await?;
//! if let Some(snapshot) = snapshots.recv().await {
//!     println!("{} entities", snapshot.len());
//! }
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hub client: transport, correlation, handshake, resync and dispatch.
pub mod client;

/// Configuration file handling and XDG path resolution.
pub mod config;

/// Logging initialization for the binary.
pub mod logging;

/// Wire message types.
pub mod protocol;

/// State of a single hub entity as reported by `get_states`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Identifier in `domain.object_id` form, e.g. `light.kitchen`.
    pub entity_id: String,
    /// Current value, e.g. `on`, `off`, `21.5`.
    pub state: String,
    /// Free-form attribute bag.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// When `state` last changed.
    #[serde(default)]
    pub last_changed: Option<String>,
    /// When the entity was last written, attributes included.
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl EntityState {
    /// Creates an entity with no attributes.
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
            last_changed: None,
            last_updated: None,
        }
    }

    /// The part of `entity_id` before the first dot.
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.entity_id)
    }

    /// Display name.
    ///
    /// Falls back from the `friendly_name` attribute to the object id with
    /// underscores shown as spaces, and finally to the raw `entity_id`.
    pub fn friendly_name(&self) -> String {
        if let Some(name) = self
            .attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
        {
            return name.to_string();
        }
        match self.entity_id.split_once('.') {
            Some((_, object_id)) if !object_id.is_empty() => object_id.replace('_', " "),
            _ => self.entity_id.clone(),
        }
    }
}

/// Complete hub state at one point in time.
///
/// Every resync produces a new snapshot that replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    entities: Vec<EntityState>,
}

impl Snapshot {
    /// Wraps a full entity list.
    pub fn new(entities: Vec<EntityState>) -> Self {
        Self { entities }
    }

    /// Parses the `result` payload of a `get_states` reply.
    pub fn from_result(result: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(result).map(Self::new)
    }

    /// All entities in hub order.
    pub fn entities(&self) -> &[EntityState] {
        &self.entities
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the hub reported no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Looks up an entity by id.
    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.entities.iter().find(|e| e.entity_id == entity_id)
    }

    /// Entities of one domain, e.g. every `light`.
    pub fn domain<'a>(&'a self, domain: &'a str) -> impl Iterator<Item = &'a EntityState> + 'a {
        self.entities.iter().filter(move |e| e.domain() == domain)
    }

    /// One line per entity: `name (entity_id): state`.
    ///
    /// This is the serialized entity summary handed to text-based consumers.
    pub fn summary(&self) -> String {
        self.entities
            .iter()
            .map(|e| format!("{} ({}): {}", e.friendly_name(), e.entity_id, e.state))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn named(entity_id: &str, state: &str, name: &str) -> EntityState {
        let mut entity = EntityState::new(entity_id, state);
        entity
            .attributes
            .insert("friendly_name".to_string(), json!(name));
        entity
    }

    #[test]
    fn test_friendly_name_from_attribute() {
        let entity = named("light.kitchen", "on", "Kitchen Light");
        assert_eq!(entity.friendly_name(), "Kitchen Light");
    }

    #[test]
    fn test_friendly_name_falls_back_to_object_id() {
        let entity = EntityState::new("sensor.living_room_temp", "21.5");
        assert_eq!(entity.friendly_name(), "living room temp");
    }

    #[test]
    fn test_friendly_name_blank_attribute_is_skipped() {
        let entity = named("switch.fan", "off", "   ");
        assert_eq!(entity.friendly_name(), "fan");
    }

    #[test]
    fn test_friendly_name_falls_back_to_entity_id() {
        let entity = EntityState::new("weird", "unknown");
        assert_eq!(entity.friendly_name(), "weird");

        let entity = EntityState::new("light.", "on");
        assert_eq!(entity.friendly_name(), "light.");
    }

    #[test]
    fn test_domain() {
        assert_eq!(EntityState::new("light.kitchen", "on").domain(), "light");
        assert_eq!(EntityState::new("nodot", "on").domain(), "nodot");
    }

    #[test]
    fn test_snapshot_from_get_states_result() {
        let result = json!([
            {
                "entity_id": "light.kitchen",
                "state": "on",
                "attributes": {"friendly_name": "Kitchen", "brightness": 255},
                "last_changed": "2024-05-01T10:00:00+00:00",
                "last_updated": "2024-05-01T10:00:00+00:00",
                "context": {"id": "01HX", "parent_id": null, "user_id": null}
            },
            {"entity_id": "sun.sun", "state": "above_horizon"}
        ]);

        let snapshot = Snapshot::from_result(result).expect("should parse");
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.is_empty());

        let kitchen = snapshot.get("light.kitchen").expect("kitchen present");
        assert_eq!(kitchen.state, "on");
        assert_eq!(kitchen.attributes["brightness"], 255);
        assert!(kitchen.last_changed.is_some());

        let sun = snapshot.get("sun.sun").expect("sun present");
        assert!(sun.attributes.is_empty());
    }

    #[test]
    fn test_snapshot_rejects_non_list_result() {
        assert!(Snapshot::from_result(json!({"entity_id": "x"})).is_err());
        assert!(Snapshot::from_result(Value::Null).is_err());
    }

    #[test]
    fn test_snapshot_domain_filter() {
        let snapshot = Snapshot::new(vec![
            EntityState::new("light.a", "on"),
            EntityState::new("switch.b", "off"),
            EntityState::new("light.c", "off"),
        ]);
        let lights: Vec<_> = snapshot.domain("light").map(|e| e.entity_id.as_str()).collect();
        assert_eq!(lights, vec!["light.a", "light.c"]);
    }

    #[test]
    fn test_snapshot_summary() {
        let snapshot = Snapshot::new(vec![
            named("light.kitchen", "on", "Kitchen"),
            EntityState::new("switch.garage_door", "off"),
        ]);
        assert_eq!(
            snapshot.summary(),
            "Kitchen (light.kitchen): on\ngarage door (switch.garage_door): off"
        );
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Snapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.summary(), "");
        assert!(snapshot.get("light.kitchen").is_none());
    }
}
