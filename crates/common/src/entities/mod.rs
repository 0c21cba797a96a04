//! The typed, self-describing persistence entities.
//!
//! Every record the controller stores implements [`Entity`]: it knows
//! its table name, carries a string id, validates itself before it is
//! persisted or dispatched, and whitelists the fields the persistence
//! port may filter on. Entity polymorphism is expressed as the tagged
//! [`Record`] variant rather than trait objects so the persistence port
//! can clone and match on records without downcasting.

use serde::{Deserialize, Serialize};

use crate::validation;

mod app;
mod bindings;
mod dns;
mod node;
mod network_interface;
mod traffic_policy;
mod zone;

pub use app::{Application, PortSpec};
pub use bindings::{
    NodeApp, NodeAppTrafficPolicy, NodeDnsConfig, NodeInterfaceTrafficPolicy, ZoneInterface,
};
pub use dns::{DnsARecord, DnsConfig};
pub use node::Node;
pub use network_interface::NetworkInterface;
pub use traffic_policy::{
    GtpFilter, IpFilter, IpModifier, MacFilter, MacModifier, TrafficPolicy, TrafficRule,
    TrafficSelector, TrafficTarget,
};
pub use zone::NetworkZone;

/// Capability set shared by all persisted records.
pub trait Entity {
    /// Name of the persistence table.
    fn table_name(&self) -> &'static str;
    /// The record id.
    fn id(&self) -> &str;
    /// Assign the record id (done by the controller on create).
    fn set_id(&mut self, id: String);
    /// Validate every field rule for this entity.
    fn validate(&self) -> validation::Result;
    /// Fields the persistence port may filter on for this entity.
    fn filter_fields(&self) -> &'static [&'static str];
    /// Read a filterable field by name.
    fn field(&self, name: &str) -> Option<String>;
}

/// Discriminant for the entity types known to the persistence port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// An edge host record.
    Node,
    /// A deployable application.
    App,
    /// A traffic policy.
    TrafficPolicy,
    /// A network interface owned by a node.
    NetworkInterface,
    /// A DNS configuration.
    DnsConfig,
    /// A network zone.
    NetworkZone,
    /// Node-to-application binding.
    NodeApp,
    /// Node-to-DNS-configuration binding.
    NodeDnsConfig,
    /// Traffic policy applied to an application on a node.
    NodeAppTrafficPolicy,
    /// Traffic policy applied to an interface on a node.
    NodeInterfaceTrafficPolicy,
    /// Zone-to-interface binding.
    ZoneInterface,
}

impl Kind {
    /// The persistence table for this entity type.
    pub fn table_name(&self) -> &'static str {
        match self {
            Kind::Node => "nodes",
            Kind::App => "apps",
            Kind::TrafficPolicy => "traffic_policies",
            Kind::NetworkInterface => "network_interfaces",
            Kind::DnsConfig => "dns_configs",
            Kind::NetworkZone => "network_zones",
            Kind::NodeApp => "nodes_apps",
            Kind::NodeDnsConfig => "nodes_dns_configs",
            Kind::NodeAppTrafficPolicy => "nodes_apps_traffic_policies",
            Kind::NodeInterfaceTrafficPolicy => "nodes_interfaces_traffic_policies",
            Kind::ZoneInterface => "zones_interfaces",
        }
    }

    /// The foreign-key column name used in referential error messages
    /// (`cannot delete node_id <id>: ...`).
    pub fn fk_column(&self) -> &'static str {
        match self {
            Kind::Node => "node_id",
            Kind::App => "app_id",
            Kind::TrafficPolicy => "traffic_policy_id",
            Kind::NetworkInterface => "interface_id",
            Kind::DnsConfig => "dns_config_id",
            Kind::NetworkZone => "zone_id",
            Kind::NodeApp => "nodes_apps_id",
            Kind::NodeDnsConfig => "nodes_dns_configs_id",
            Kind::NodeAppTrafficPolicy => "nodes_apps_traffic_policies_id",
            Kind::NodeInterfaceTrafficPolicy => "nodes_interfaces_traffic_policies_id",
            Kind::ZoneInterface => "zones_interfaces_id",
        }
    }

    /// Join-entity kinds whose rows block deletion of this entity type,
    /// paired with the join field that references it.
    ///
    /// The order here is the order the referential scan runs in, so the
    /// first populated table is the one named in the error.
    pub fn referencing_joins(&self) -> &'static [(Kind, &'static str)] {
        match self {
            Kind::Node => &[
                (Kind::NodeApp, "node_id"),
                (Kind::NodeDnsConfig, "node_id"),
                (Kind::NodeAppTrafficPolicy, "node_id"),
                (Kind::NodeInterfaceTrafficPolicy, "node_id"),
                (Kind::ZoneInterface, "node_id"),
            ],
            Kind::App => &[
                (Kind::NodeApp, "app_id"),
                (Kind::NodeAppTrafficPolicy, "app_id"),
            ],
            Kind::TrafficPolicy => &[
                (Kind::NodeAppTrafficPolicy, "traffic_policy_id"),
                (Kind::NodeInterfaceTrafficPolicy, "traffic_policy_id"),
            ],
            Kind::NetworkInterface => &[
                (Kind::NodeInterfaceTrafficPolicy, "interface_id"),
                (Kind::ZoneInterface, "interface_id"),
            ],
            Kind::DnsConfig => &[(Kind::NodeDnsConfig, "dns_config_id")],
            Kind::NetworkZone => &[(Kind::ZoneInterface, "zone_id")],
            _ => &[],
        }
    }
}

/// A persisted record, tagged by entity type.
#[derive(Debug, Clone)]
pub enum Record {
    /// See [`Node`].
    Node(Node),
    /// See [`Application`].
    App(Application),
    /// See [`TrafficPolicy`].
    TrafficPolicy(TrafficPolicy),
    /// See [`NetworkInterface`].
    NetworkInterface(NetworkInterface),
    /// See [`DnsConfig`].
    DnsConfig(DnsConfig),
    /// See [`NetworkZone`].
    NetworkZone(NetworkZone),
    /// See [`NodeApp`].
    NodeApp(NodeApp),
    /// See [`NodeDnsConfig`].
    NodeDnsConfig(NodeDnsConfig),
    /// See [`NodeAppTrafficPolicy`].
    NodeAppTrafficPolicy(NodeAppTrafficPolicy),
    /// See [`NodeInterfaceTrafficPolicy`].
    NodeInterfaceTrafficPolicy(NodeInterfaceTrafficPolicy),
    /// See [`ZoneInterface`].
    ZoneInterface(ZoneInterface),
}

macro_rules! with_entity {
    ($record:expr, $name:ident => $body:expr) => {
        match $record {
            Record::Node($name) => $body,
            Record::App($name) => $body,
            Record::TrafficPolicy($name) => $body,
            Record::NetworkInterface($name) => $body,
            Record::DnsConfig($name) => $body,
            Record::NetworkZone($name) => $body,
            Record::NodeApp($name) => $body,
            Record::NodeDnsConfig($name) => $body,
            Record::NodeAppTrafficPolicy($name) => $body,
            Record::NodeInterfaceTrafficPolicy($name) => $body,
            Record::ZoneInterface($name) => $body,
        }
    };
}

impl Record {
    /// The entity type tag for this record.
    pub fn kind(&self) -> Kind {
        match self {
            Record::Node(_) => Kind::Node,
            Record::App(_) => Kind::App,
            Record::TrafficPolicy(_) => Kind::TrafficPolicy,
            Record::NetworkInterface(_) => Kind::NetworkInterface,
            Record::DnsConfig(_) => Kind::DnsConfig,
            Record::NetworkZone(_) => Kind::NetworkZone,
            Record::NodeApp(_) => Kind::NodeApp,
            Record::NodeDnsConfig(_) => Kind::NodeDnsConfig,
            Record::NodeAppTrafficPolicy(_) => Kind::NodeAppTrafficPolicy,
            Record::NodeInterfaceTrafficPolicy(_) => Kind::NodeInterfaceTrafficPolicy,
            Record::ZoneInterface(_) => Kind::ZoneInterface,
        }
    }

    /// The record id.
    pub fn id(&self) -> &str {
        with_entity!(self, e => e.id())
    }

    /// Assign the record id.
    pub fn set_id(&mut self, id: String) {
        with_entity!(self, e => e.set_id(id))
    }

    /// Validate the record.
    pub fn validate(&self) -> validation::Result {
        with_entity!(self, e => e.validate())
    }

    /// Fields the persistence port may filter on.
    pub fn filter_fields(&self) -> &'static [&'static str] {
        with_entity!(self, e => e.filter_fields())
    }

    /// Read a filterable field by name.
    pub fn field(&self, name: &str) -> Option<String> {
        with_entity!(self, e => e.field(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_delegates_to_entity() {
        let mut record = Record::Node(Node {
            id: String::new(),
            name: "node123".into(),
            location: "smart edge lab".into(),
            serial: "abc123".into(),
        });
        record.set_id("99459845-422d-4b32-8395-e8f50fd34792".into());
        assert_eq!(record.id(), "99459845-422d-4b32-8395-e8f50fd34792");
        assert_eq!(record.kind().table_name(), "nodes");
        assert!(record.validate().is_ok());
        assert_eq!(record.field("serial").as_deref(), Some("abc123"));
    }

    #[test]
    fn node_delete_is_blocked_by_dns_join_first_when_scanned_in_order() {
        let joins = Kind::Node.referencing_joins();
        assert_eq!(joins[0].0, Kind::NodeApp);
        assert!(joins
            .iter()
            .any(|(kind, field)| *kind == Kind::NodeDnsConfig && *field == "node_id"));
    }
}
