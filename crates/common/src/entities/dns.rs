use serde::{Deserialize, Serialize};

use crate::validation::{self, ValidationError};

use super::Entity;

/// A DNS configuration that can be bound to nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Operator-facing name.
    #[serde(default)]
    pub name: String,
    /// Authoritative A records served by the node resolver.
    #[serde(default)]
    pub a_records: Vec<DnsARecord>,
}

/// A single authoritative A record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsARecord {
    /// Record name (FQDN).
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Addresses the name resolves to.
    #[serde(default)]
    pub ips: Vec<String>,
}

impl DnsARecord {
    fn validate(&self) -> validation::Result {
        if self.name.is_empty() {
            return Err(ValidationError::new("name cannot be empty"));
        }
        for (i, ip) in self.ips.iter().enumerate() {
            validation::parse_ip(ip).map_err(|err| err.prefixed(format_args!("ips[{i}]")))?;
        }
        Ok(())
    }
}

impl Entity for DnsConfig {
    fn table_name(&self) -> &'static str {
        "dns_configs"
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
        for (i, record) in self.a_records.iter().enumerate() {
            record
                .validate()
                .map_err(|err| err.prefixed(format_args!("a_records[{i}]")))?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_record_ip_errors_are_indexed() {
        let cfg = DnsConfig {
            id: "6bf04732-7a3d-4a92-b4a5-8a6a4bbcd3f1".into(),
            name: "lab".into(),
            a_records: vec![DnsARecord {
                name: "sensor.lab.local".into(),
                description: String::new(),
                ips: vec!["10.0.0.300".into()],
            }],
        };
        assert_eq!(
            cfg.validate().unwrap_err().to_string(),
            "a_records[0].ips[0].address could not be parsed"
        );
    }
}
