//! Entity-to-wire conversions for agent RPCs.

use common::entities::{
    Application, DnsARecord, DnsConfig, GtpFilter, IpFilter, IpModifier, MacFilter, MacModifier,
    NetworkInterface, TrafficPolicy, TrafficRule, TrafficSelector, TrafficTarget,
};

/// Convert a traffic policy for the wire, carrying the binding id the
/// agent keys the rules by (app or interface).
pub fn to_pb_traffic_policy(id: &str, policy: Option<&TrafficPolicy>) -> proto::TrafficPolicy {
    let mut pb = proto::TrafficPolicy {
        id: id.to_string(),
        traffic_rules: Vec::new(),
    };
    if let Some(policy) = policy {
        pb.traffic_rules = policy.rules.iter().map(to_pb_traffic_rule).collect();
    }
    pb
}

fn to_pb_traffic_rule(rule: &TrafficRule) -> proto::TrafficRule {
    proto::TrafficRule {
        description: rule.description.clone(),
        priority: rule.priority as u32,
        source: rule.source.as_ref().map(to_pb_traffic_selector),
        destination: rule.destination.as_ref().map(to_pb_traffic_selector),
        target: rule.target.as_ref().map(to_pb_traffic_target),
    }
}

fn to_pb_traffic_selector(selector: &TrafficSelector) -> proto::TrafficSelector {
    proto::TrafficSelector {
        description: selector.description.clone(),
        macs: selector.macs.as_ref().map(to_pb_mac_filter),
        ip: selector.ip.as_ref().map(to_pb_ip_filter),
        gtp: selector.gtp.as_ref().map(to_pb_gtp_filter),
    }
}

fn to_pb_mac_filter(filter: &MacFilter) -> proto::MacFilter {
    proto::MacFilter {
        mac_addresses: filter.macs.clone(),
    }
}

fn to_pb_ip_filter(filter: &IpFilter) -> proto::IpFilter {
    proto::IpFilter {
        address: filter.address.clone(),
        mask: filter.mask as u32,
        begin_port: filter.begin_port as u32,
        end_port: filter.end_port as u32,
        protocol: filter.protocol.clone(),
    }
}

fn to_pb_gtp_filter(filter: &GtpFilter) -> proto::GtpFilter {
    proto::GtpFilter {
        address: filter.address.clone(),
        mask: filter.mask as u32,
        imsis: filter.imsis.clone(),
    }
}

fn to_pb_traffic_target(target: &TrafficTarget) -> proto::TrafficTarget {
    proto::TrafficTarget {
        description: target.description.clone(),
        action: target.action.clone(),
        mac: target.mac.as_ref().map(to_pb_mac_modifier),
        ip: target.ip.as_ref().map(to_pb_ip_modifier),
    }
}

fn to_pb_mac_modifier(modifier: &MacModifier) -> proto::MacModifier {
    proto::MacModifier {
        mac_address: modifier.mac_address.clone(),
    }
}

fn to_pb_ip_modifier(modifier: &IpModifier) -> proto::IpModifier {
    proto::IpModifier {
        address: modifier.address.clone(),
        port: modifier.port as u32,
    }
}

/// Convert an application for a deploy command.
pub fn to_pb_app(app: &Application) -> proto::Application {
    proto::Application {
        id: app.id.clone(),
        r#type: app.kind.clone(),
        name: app.name.clone(),
        vendor: app.vendor.clone(),
        description: app.description.clone(),
        version: app.version.clone(),
        cores: app.cores,
        memory: app.memory,
        ports: app
            .ports
            .iter()
            .map(|p| proto::PortSpec {
                port: p.port,
                protocol: p.protocol.clone(),
            })
            .collect(),
        source: app.source.clone(),
    }
}

/// Convert an interface for a bulk update command.
pub fn to_pb_interface(iface: &NetworkInterface) -> proto::NetworkInterface {
    proto::NetworkInterface {
        id: iface.id.clone(),
        description: iface.description.clone(),
        driver: iface.driver.clone(),
        r#type: iface.kind.clone(),
        mac_address: iface.mac_address.clone(),
        vlan: iface.vlan,
        zones: iface.zones.clone(),
        fallback_interface: iface.fallback_interface.clone(),
    }
}

/// Convert the interface inventory an agent announces on first contact.
pub fn from_pb_interfaces(node_id: &str, interfaces: &[proto::NetworkInterface]) -> Vec<NetworkInterface> {
    interfaces
        .iter()
        .map(|pb| NetworkInterface {
            id: pb.id.clone(),
            node_id: node_id.to_string(),
            description: pb.description.clone(),
            driver: pb.driver.clone(),
            kind: pb.r#type.clone(),
            mac_address: pb.mac_address.clone(),
            vlan: pb.vlan,
            zones: pb.zones.clone(),
            fallback_interface: pb.fallback_interface.clone(),
        })
        .collect()
}

/// Convert a DNS configuration for the wire.
pub fn to_pb_dns_config(config: &DnsConfig) -> proto::DnsConfig {
    proto::DnsConfig {
        id: config.id.clone(),
        name: config.name.clone(),
        a_records: config.a_records.iter().map(to_pb_a_record).collect(),
    }
}

fn to_pb_a_record(record: &DnsARecord) -> proto::DnsARecord {
    proto::DnsARecord {
        name: record.name.clone(),
        description: record.description.clone(),
        ips: record.ips.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_policy_clears_rules_but_keeps_the_binding_id() {
        let pb = to_pb_traffic_policy("if0", None);
        assert_eq!(pb.id, "if0");
        assert!(pb.traffic_rules.is_empty());
    }

    #[test]
    fn selectors_and_targets_convert_field_for_field() {
        let policy = TrafficPolicy {
            id: "9d740cee-035f-4076-847c-d1c80cdf19db".into(),
            name: "p".into(),
            rules: vec![TrafficRule {
                description: "r".into(),
                priority: 7,
                source: Some(TrafficSelector {
                    description: String::new(),
                    macs: Some(MacFilter {
                        macs: vec!["aa:bb:cc:dd:ee:ff".into()],
                    }),
                    ip: None,
                    gtp: None,
                }),
                destination: None,
                target: Some(TrafficTarget {
                    description: String::new(),
                    action: "accept".into(),
                    mac: None,
                    ip: Some(IpModifier {
                        address: "10.0.0.9".into(),
                        port: 443,
                    }),
                }),
            }],
        };

        let pb = to_pb_traffic_policy(&policy.id, Some(&policy));
        assert_eq!(pb.traffic_rules.len(), 1);
        let rule = &pb.traffic_rules[0];
        assert_eq!(rule.priority, 7);
        assert_eq!(
            rule.source.as_ref().unwrap().macs.as_ref().unwrap().mac_addresses,
            vec!["aa:bb:cc:dd:ee:ff".to_string()]
        );
        let target = rule.target.as_ref().unwrap();
        assert_eq!(target.action, "accept");
        assert_eq!(target.ip.as_ref().unwrap().port, 443);
    }

    #[test]
    fn interface_inventory_round_trips_with_the_node_id_attached() {
        let pb = proto::NetworkInterface {
            id: "if0".into(),
            description: String::new(),
            driver: "kernel".into(),
            r#type: "upstream".into(),
            mac_address: "aa:bb:cc:dd:ee:ff".into(),
            vlan: 10,
            zones: vec![],
            fallback_interface: String::new(),
        };
        let parsed = from_pb_interfaces("ef51be63-e397-4e45-a2e7-ecb5c7c752ef", &[pb.clone()]);
        assert_eq!(parsed[0].node_id, "ef51be63-e397-4e45-a2e7-ecb5c7c752ef");
        assert_eq!(to_pb_interface(&parsed[0]), pb);
    }
}
