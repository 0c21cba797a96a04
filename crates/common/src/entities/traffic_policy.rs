use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validation::{self, ValidationError};

use super::Entity;

/// An application or interface traffic policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficPolicy {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Operator-facing name.
    #[serde(default)]
    pub name: String,
    /// Ordered rule set; must be non-empty.
    #[serde(rename = "traffic_rules", default)]
    pub rules: Vec<TrafficRule>,
}

impl Entity for TrafficPolicy {
    fn table_name(&self) -> &'static str {
        "traffic_policies"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> validation::Result {
        if !validation::valid_uuid(&self.id) {
            return Err(ValidationError::new("id not a valid uuid"));
        }
        if self.name.is_empty() {
            return Err(ValidationError::new("name cannot be empty"));
        }
        if self.rules.is_empty() {
            return Err(ValidationError::new("rules cannot be empty"));
        }
        for (i, rule) in self.rules.iter().enumerate() {
            rule.validate()
                .map_err(|err| err.prefixed(format_args!("rules[{i}]")))?;
        }
        Ok(())
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &[]
    }

    fn field(&self, _name: &str) -> Option<String> {
        None
    }
}

impl fmt::Display for TrafficPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TrafficPolicy[")?;
        writeln!(f, "    ID: {}", self.id)?;
        writeln!(f, "    Name: {}", self.name)?;
        writeln!(f, "    Rules: [")?;
        for rule in &self.rules {
            writeln!(f, "        {rule:?}")?;
        }
        write!(f, "    ]\n]")
    }
}

/// A single traffic rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficRule {
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Rule priority; 1..=65535.
    #[serde(default)]
    pub priority: i64,
    /// Match on traffic source; at least one of source/destination is set.
    #[serde(default)]
    pub source: Option<TrafficSelector>,
    /// Match on traffic destination.
    #[serde(default)]
    pub destination: Option<TrafficSelector>,
    /// What to do with matching traffic.
    #[serde(default)]
    pub target: Option<TrafficTarget>,
}

impl TrafficRule {
    /// Validate the rule; errors are path-prefixed by the caller.
    pub fn validate(&self) -> validation::Result {
        if self.priority < 1 || self.priority > 65535 {
            return Err(ValidationError::new("priority must be in [1..65535]"));
        }
        if self.source.is_none() && self.destination.is_none() {
            return Err(ValidationError::new(
                "source & destination cannot both be empty",
            ));
        }
        if let Some(source) = &self.source {
            source.validate().map_err(|err| err.prefixed("source"))?;
        }
        if let Some(destination) = &self.destination {
            destination
                .validate()
                .map_err(|err| err.prefixed("destination"))?;
        }
        let Some(target) = &self.target else {
            return Err(ValidationError::new("target cannot be empty"));
        };
        target.validate().map_err(|err| err.prefixed("target"))?;
        Ok(())
    }
}

/// Matches traffic by one or more of MAC, IP, or GTP filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficSelector {
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// MAC address filter.
    #[serde(rename = "mac_filter", default)]
    pub macs: Option<MacFilter>,
    /// IP filter.
    #[serde(rename = "ip_filter", default)]
    pub ip: Option<IpFilter>,
    /// GTP filter.
    #[serde(rename = "gtp_filter", default)]
    pub gtp: Option<GtpFilter>,
}

impl TrafficSelector {
    /// Validate the selector; at least one filter must be present.
    pub fn validate(&self) -> validation::Result {
        if self.macs.is_none() && self.ip.is_none() && self.gtp.is_none() {
            return Err(ValidationError::new(
                "mac_filter|ip_filter|gtp_filter cannot all be nil",
            ));
        }
        if let Some(macs) = &self.macs {
            macs.validate().map_err(|err| err.prefixed("mac_filter"))?;
        }
        if let Some(ip) = &self.ip {
            ip.validate().map_err(|err| err.prefixed("ip_filter"))?;
        }
        if let Some(gtp) = &self.gtp {
            gtp.validate().map_err(|err| err.prefixed("gtp_filter"))?;
        }
        Ok(())
    }
}

/// What to do with matched traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficTarget {
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// One of `accept`, `reject`, `drop`.
    #[serde(default)]
    pub action: String,
    /// Optional MAC rewrite.
    #[serde(rename = "mac_modifier", default)]
    pub mac: Option<MacModifier>,
    /// Optional IP/port rewrite.
    #[serde(rename = "ip_modifier", default)]
    pub ip: Option<IpModifier>,
}

impl TrafficTarget {
    /// Validate the target action and modifiers.
    pub fn validate(&self) -> validation::Result {
        match self.action.as_str() {
            "accept" | "reject" | "drop" => {}
            _ => {
                return Err(ValidationError::new(
                    "action must be one of [accept, reject, drop]",
                ))
            }
        }
        if let Some(mac) = &self.mac {
            mac.validate().map_err(|err| err.prefixed("mac_modifier"))?;
        }
        if let Some(ip) = &self.ip {
            ip.validate().map_err(|err| err.prefixed("ip_modifier"))?;
        }
        Ok(())
    }
}

/// Filter on hardware addresses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacFilter {
    /// Matched MAC addresses.
    #[serde(rename = "mac_addresses", default)]
    pub macs: Vec<String>,
}

impl MacFilter {
    /// Validate every listed MAC.
    pub fn validate(&self) -> validation::Result {
        for (i, mac) in self.macs.iter().enumerate() {
            if validation::parse_mac(mac).is_err() {
                return Err(ValidationError::new(format!(
                    "mac_addresses[{i}] could not be parsed (invalid MAC address {mac})"
                )));
            }
        }
        Ok(())
    }
}

/// Filter on address, mask, port range and protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpFilter {
    /// IP address to match.
    #[serde(default)]
    pub address: String,
    /// Network mask bits; 0..=128.
    #[serde(default)]
    pub mask: i64,
    /// Start of the matched port range; 0..=65535.
    #[serde(default)]
    pub begin_port: i64,
    /// End of the matched port range; 0..=65535, >= begin_port.
    #[serde(default)]
    pub end_port: i64,
    /// One of `tcp`, `udp`, `icmp`, `sctp`, `all`.
    #[serde(default)]
    pub protocol: String,
}

impl IpFilter {
    /// Validate address, mask, port range and protocol.
    pub fn validate(&self) -> validation::Result {
        validation::parse_ip(&self.address)?;
        if self.mask < 0 || self.mask > 128 {
            return Err(ValidationError::new("mask must be in [0..128]"));
        }
        if self.begin_port < 0 || self.begin_port > 65535 {
            return Err(ValidationError::new("begin_port must be in [0..65535]"));
        }
        if self.end_port < 0 || self.end_port > 65535 {
            return Err(ValidationError::new("end_port must be in [0..65535]"));
        }
        if self.begin_port > self.end_port {
            return Err(ValidationError::new("begin_port must be <= end_port"));
        }
        match self.protocol.as_str() {
            "tcp" | "udp" | "icmp" | "sctp" | "all" => Ok(()),
            _ => Err(ValidationError::new(
                "protocol must be one of [tcp, udp, icmp, sctp, all]",
            )),
        }
    }
}

/// Filter on GTP tunnel endpoints and subscriber identities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GtpFilter {
    /// GTP endpoint address; required.
    #[serde(default)]
    pub address: String,
    /// Network mask bits; 0..=128.
    #[serde(default)]
    pub mask: i64,
    /// Matched IMSIs; each 14 or 15 decimal digits.
    #[serde(default)]
    pub imsis: Vec<String>,
}

impl GtpFilter {
    /// Validate address, mask and IMSIs.
    pub fn validate(&self) -> validation::Result {
        if self.address.is_empty() {
            return Err(ValidationError::new("address cannot be empty"));
        }
        validation::parse_ip(&self.address)?;
        if self.mask < 0 || self.mask > 128 {
            return Err(ValidationError::new("mask must be in [0..128]"));
        }
        for (i, imsi) in self.imsis.iter().enumerate() {
            let digits = (imsi.len() == 14 || imsi.len() == 15)
                && imsi.chars().all(|c| c.is_ascii_digit());
            if !digits {
                return Err(ValidationError::new(format!(
                    "imsis[{i}] must be 14 or 15 digits"
                )));
            }
        }
        Ok(())
    }
}

/// Rewrites the destination hardware address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacModifier {
    /// Replacement MAC address.
    #[serde(default)]
    pub mac_address: String,
}

impl MacModifier {
    /// Validate the replacement MAC.
    pub fn validate(&self) -> validation::Result {
        validation::parse_mac(&self.mac_address).map_err(|_| {
            ValidationError::new(format!(
                "mac_address could not be parsed (invalid MAC address {})",
                self.mac_address
            ))
        })
    }
}

/// Rewrites the destination address and port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpModifier {
    /// Replacement IP address.
    #[serde(default)]
    pub address: String,
    /// Replacement port; 1..=65535.
    #[serde(default)]
    pub port: i64,
}

impl IpModifier {
    /// Validate the replacement address and port.
    pub fn validate(&self) -> validation::Result {
        validation::parse_ip(&self.address)?;
        if self.port < 1 || self.port > 65535 {
            return Err(ValidationError::new("port must be in [1..65535]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TrafficPolicy {
        TrafficPolicy {
            id: "9d740cee-035f-4076-847c-d1c80cdf19db".into(),
            name: "block-inbound".into(),
            rules: vec![TrafficRule {
                description: "inbound from sensor net".into(),
                priority: 5,
                source: Some(TrafficSelector {
                    description: String::new(),
                    macs: None,
                    ip: Some(IpFilter {
                        address: "223.1.1.0".into(),
                        mask: 24,
                        begin_port: 2000,
                        end_port: 2012,
                        protocol: "tcp".into(),
                    }),
                    gtp: None,
                }),
                destination: None,
                target: Some(TrafficTarget {
                    description: String::new(),
                    action: "drop".into(),
                    mac: None,
                    ip: None,
                }),
            }],
        }
    }

    #[test]
    fn valid_policy_passes() {
        assert!(policy().validate().is_ok());
    }

    #[test]
    fn empty_rules_rejected() {
        let mut p = policy();
        p.rules.clear();
        assert_eq!(
            p.validate().unwrap_err().to_string(),
            "rules cannot be empty"
        );
    }

    #[test]
    fn begin_port_error_carries_full_path() {
        let mut p = policy();
        p.rules[0].source.as_mut().unwrap().ip.as_mut().unwrap().begin_port = -1;
        assert_eq!(
            p.validate().unwrap_err().to_string(),
            "rules[0].source.ip_filter.begin_port must be in [0..65535]"
        );
    }

    #[test]
    fn destination_path_is_distinguished_from_source() {
        let mut p = policy();
        p.rules[0].destination = p.rules[0].source.take();
        p.rules[0]
            .destination
            .as_mut()
            .unwrap()
            .ip
            .as_mut()
            .unwrap()
            .mask = 129;
        assert_eq!(
            p.validate().unwrap_err().to_string(),
            "rules[0].destination.ip_filter.mask must be in [0..128]"
        );
    }

    #[test]
    fn rule_requires_some_selector() {
        let mut p = policy();
        p.rules[0].source = None;
        assert_eq!(
            p.validate().unwrap_err().to_string(),
            "rules[0].source & destination cannot both be empty"
        );
    }

    #[test]
    fn selector_requires_some_filter() {
        let mut p = policy();
        p.rules[0].source = Some(TrafficSelector::default());
        assert_eq!(
            p.validate().unwrap_err().to_string(),
            "rules[0].source.mac_filter|ip_filter|gtp_filter cannot all be nil"
        );
    }

    #[test]
    fn port_range_must_be_ordered() {
        let mut p = policy();
        let ip = p.rules[0].source.as_mut().unwrap().ip.as_mut().unwrap();
        ip.begin_port = 300;
        ip.end_port = 200;
        assert_eq!(
            p.validate().unwrap_err().to_string(),
            "rules[0].source.ip_filter.begin_port must be <= end_port"
        );
    }

    #[test]
    fn target_action_is_constrained() {
        let mut p = policy();
        p.rules[0].target.as_mut().unwrap().action = "mirror".into();
        assert_eq!(
            p.validate().unwrap_err().to_string(),
            "rules[0].target.action must be one of [accept, reject, drop]"
        );
    }

    #[test]
    fn mac_filter_error_text_joins_with_a_space() {
        let mut p = policy();
        let source = p.rules[0].source.as_mut().unwrap();
        source.ip = None;
        source.macs = Some(MacFilter {
            macs: vec!["aa".into()],
        });
        assert_eq!(
            p.validate().unwrap_err().to_string(),
            "rules[0].source.mac_filter.mac_addresses[0] could not be parsed \
             (invalid MAC address aa)"
        );
    }

    #[test]
    fn mac_modifier_error_text_joins_with_a_space() {
        let mut p = policy();
        p.rules[0].target.as_mut().unwrap().mac = Some(MacModifier {
            mac_address: "bb".into(),
        });
        assert_eq!(
            p.validate().unwrap_err().to_string(),
            "rules[0].target.mac_modifier.mac_address could not be parsed \
             (invalid MAC address bb)"
        );
    }

    #[test]
    fn gtp_filter_validates_imsis() {
        let mut p = policy();
        p.rules[0].source.as_mut().unwrap().ip = None;
        p.rules[0].source.as_mut().unwrap().gtp = Some(GtpFilter {
            address: "10.0.0.1".into(),
            mask: 32,
            imsis: vec!["1234".into()],
        });
        assert_eq!(
            p.validate().unwrap_err().to_string(),
            "rules[0].source.gtp_filter.imsis[0] must be 14 or 15 digits"
        );
    }

    #[test]
    fn modifier_port_is_one_based() {
        let mut p = policy();
        p.rules[0].target.as_mut().unwrap().ip = Some(IpModifier {
            address: "10.0.0.9".into(),
            port: 0,
        });
        assert_eq!(
            p.validate().unwrap_err().to_string(),
            "rules[0].target.ip_modifier.port must be in [1..65535]"
        );
    }

    #[test]
    fn json_round_trip_uses_original_field_names() {
        let p = policy();
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"traffic_rules\""));
        assert!(json.contains("\"ip_filter\""));
        assert!(json.contains("\"begin_port\""));
        let back: TrafficPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
