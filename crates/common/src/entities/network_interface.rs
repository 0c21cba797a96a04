use serde::{Deserialize, Serialize};

use crate::validation::{self, ValidationError};

use super::Entity;

/// A network interface owned by a node.
///
/// The interface set is fixed at enrollment (reported by the agent on
/// first contact) and only mutated by bulk replacement; ids are the
/// node-local device names (`if0`), not UUIDs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Node-local interface id, e.g. `if0`.
    #[serde(default)]
    pub id: String,
    /// Owning node id; populated by the controller.
    #[serde(default)]
    pub node_id: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// One of `kernel`, `userspace`.
    #[serde(default)]
    pub driver: String,
    /// One of `none`, `upstream`, `downstream`, `bidirectional`, `breakout`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Hardware address.
    #[serde(default)]
    pub mac_address: String,
    /// VLAN tag.
    #[serde(default)]
    pub vlan: i64,
    /// Zones the interface participates in.
    #[serde(default)]
    pub zones: Vec<String>,
    /// Interface traffic falls back to when this one is unavailable.
    #[serde(default)]
    pub fallback_interface: String,
}

impl Entity for NetworkInterface {
    fn table_name(&self) -> &'static str {
        "network_interfaces"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> validation::Result {
        if self.id.is_empty() {
            return Err(ValidationError::new("id cannot be empty"));
        }
        match self.driver.as_str() {
            "kernel" | "userspace" => {}
            _ => {
                return Err(ValidationError::new(
                    "driver must be one of [kernel, userspace]",
                ))
            }
        }
        match self.kind.as_str() {
            "none" | "upstream" | "downstream" | "bidirectional" | "breakout" => {}
            _ => {
                return Err(ValidationError::new(
                    "type must be one of [none, upstream, downstream, bidirectional, breakout]",
                ))
            }
        }
        if !self.mac_address.is_empty() && validation::parse_mac(&self.mac_address).is_err() {
            return Err(ValidationError::new(format!(
                "mac_address could not be parsed (invalid MAC address {})",
                self.mac_address
            )));
        }
        if self.vlan < 0 || self.vlan > 4095 {
            return Err(ValidationError::new("vlan must be in [0..4095]"));
        }
        Ok(())
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["node_id"]
    }

    fn field(&self, name: &str) -> Option<String> {
        match name {
            "node_id" => Some(self.node_id.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interface() -> NetworkInterface {
        NetworkInterface {
            id: "if0".into(),
            node_id: "ef51be63-e397-4e45-a2e7-ecb5c7c752ef".into(),
            description: "upstream 10G".into(),
            driver: "kernel".into(),
            kind: "upstream".into(),
            mac_address: "aa:bb:cc:dd:ee:ff".into(),
            vlan: 100,
            zones: vec![],
            fallback_interface: String::new(),
        }
    }

    #[test]
    fn valid_interface_passes() {
        assert!(interface().validate().is_ok());
    }

    #[test]
    fn driver_and_type_are_constrained() {
        let mut i = interface();
        i.driver = "dpdk".into();
        assert_eq!(
            i.validate().unwrap_err().to_string(),
            "driver must be one of [kernel, userspace]"
        );

        let mut i = interface();
        i.kind = "trunk".into();
        assert!(i.validate().is_err());
    }

    #[test]
    fn vlan_range() {
        let mut i = interface();
        i.vlan = 5000;
        assert_eq!(
            i.validate().unwrap_err().to_string(),
            "vlan must be in [0..4095]"
        );
    }
}
