use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validation::{self, ValidationError};

use super::Entity;

/// A deployable application image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// One of `container`, `vm`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Operator-facing name.
    #[serde(default)]
    pub name: String,
    /// Publishing vendor.
    #[serde(default)]
    pub vendor: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Application version string.
    #[serde(default)]
    pub version: String,
    /// CPU cores requested; 1..=8.
    #[serde(default)]
    pub cores: i64,
    /// Memory requested in MB; 1..=16384.
    #[serde(default)]
    pub memory: i64,
    /// Ports the application exposes.
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    /// Image source URI.
    #[serde(default)]
    pub source: String,
}

/// A port exposed by an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Exposed port; 1..=65535.
    #[serde(default)]
    pub port: i64,
    /// One of `tcp`, `udp`, `icmp`, `sctp`, `all`.
    #[serde(default)]
    pub protocol: String,
}

impl PortSpec {
    fn validate(&self) -> validation::Result {
        if self.port < 1 || self.port > 65535 {
            return Err(ValidationError::new("port must be in [1..65535]"));
        }
        match self.protocol.as_str() {
            "tcp" | "udp" | "icmp" | "sctp" | "all" => Ok(()),
            _ => Err(ValidationError::new(
                "protocol must be one of [tcp, udp, icmp, sctp, all]",
            )),
        }
    }
}

impl Entity for Application {
    fn table_name(&self) -> &'static str {
        "apps"
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
        match self.kind.as_str() {
            "container" | "vm" => {}
            _ => return Err(ValidationError::new("type must be container or vm")),
        }
        if self.name.is_empty() {
            return Err(ValidationError::new("name cannot be empty"));
        }
        if self.vendor.is_empty() {
            return Err(ValidationError::new("vendor cannot be empty"));
        }
        if self.version.is_empty() {
            return Err(ValidationError::new("version cannot be empty"));
        }
        if self.cores < 1 || self.cores > 8 {
            return Err(ValidationError::new("cores must be in [1..8]"));
        }
        if self.memory < 1 || self.memory > 16384 {
            return Err(ValidationError::new("memory must be in [1..16384]"));
        }
        for (i, port) in self.ports.iter().enumerate() {
            port.validate()
                .map_err(|err| err.prefixed(format_args!("ports[{i}]")))?;
        }
        if self.source.is_empty() {
            return Err(ValidationError::new("source cannot be empty"));
        }
        Ok(())
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["type"]
    }

    fn field(&self, name: &str) -> Option<String> {
        match name {
            "type" => Some(self.kind.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "App[\n    ID: {}\n    Type: {}\n    Name: {}\n    Version: {}\n    Vendor: {}\n    Cores: {}\n    Memory: {}\n    Source: {}\n]",
            self.id, self.kind, self.name, self.version, self.vendor, self.cores, self.memory,
            self.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> Application {
        Application {
            id: "99459845-422d-4b32-8395-e8f50fd34792".into(),
            kind: "container".into(),
            name: "sensor-ingest".into(),
            vendor: "smart edge".into(),
            description: String::new(),
            version: "1.2.0".into(),
            cores: 2,
            memory: 1024,
            ports: vec![PortSpec {
                port: 8080,
                protocol: "tcp".into(),
            }],
            source: "https://registry.local/sensor-ingest:1.2.0".into(),
        }
    }

    #[test]
    fn valid_app_passes() {
        assert!(app().validate().is_ok());
    }

    #[test]
    fn type_is_constrained() {
        let mut a = app();
        a.kind = "unikernel".into();
        assert_eq!(
            a.validate().unwrap_err().to_string(),
            "type must be container or vm"
        );
    }

    #[test]
    fn resource_bounds() {
        let mut a = app();
        a.cores = 0;
        assert_eq!(
            a.validate().unwrap_err().to_string(),
            "cores must be in [1..8]"
        );

        let mut a = app();
        a.memory = 32768;
        assert_eq!(
            a.validate().unwrap_err().to_string(),
            "memory must be in [1..16384]"
        );
    }

    #[test]
    fn port_errors_are_indexed() {
        let mut a = app();
        a.ports[0].port = 0;
        assert_eq!(
            a.validate().unwrap_err().to_string(),
            "ports[0].port must be in [1..65535]"
        );
    }
}
