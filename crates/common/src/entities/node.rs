use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validation::{self, ValidationError};

use super::Entity;

/// An edge host.
///
/// `serial` is the out-of-band identifier operators use to pre-authorize
/// enrollment. The controller assigns `id` on create and rebinds it to
/// the key-derived identity when the node enrolls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Controller-assigned UUID; equals the CN of the node's certificate
    /// once enrolled.
    #[serde(default)]
    pub id: String,
    /// Operator-facing name.
    #[serde(default)]
    pub name: String,
    /// Physical location description.
    #[serde(default)]
    pub location: String,
    /// Out-of-band hardware serial; required and unique.
    #[serde(default)]
    pub serial: String,
}

impl Entity for Node {
    fn table_name(&self) -> &'static str {
        "nodes"
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
        if self.location.is_empty() {
            return Err(ValidationError::new("location cannot be empty"));
        }
        if self.serial.is_empty() {
            return Err(ValidationError::new("serial cannot be empty"));
        }
        Ok(())
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["serial"]
    }

    fn field(&self, name: &str) -> Option<String> {
        match name {
            "serial" => Some(self.serial.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node[\n    ID: {}\n    Name: {}\n    Location: {}\n    Serial: {}\n]",
            self.id, self.name, self.location, self.serial
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node {
            id: "ef51be63-e397-4e45-a2e7-ecb5c7c752ef".into(),
            name: "node123".into(),
            location: "smart edge lab".into(),
            serial: "abc123".into(),
        }
    }

    #[test]
    fn valid_node_passes() {
        assert!(node().validate().is_ok());
    }

    #[test]
    fn missing_fields_are_named() {
        let mut n = node();
        n.name.clear();
        assert_eq!(n.validate().unwrap_err().to_string(), "name cannot be empty");

        let mut n = node();
        n.location.clear();
        assert_eq!(
            n.validate().unwrap_err().to_string(),
            "location cannot be empty"
        );

        let mut n = node();
        n.serial.clear();
        assert_eq!(
            n.validate().unwrap_err().to_string(),
            "serial cannot be empty"
        );
    }

    #[test]
    fn id_must_be_uuid() {
        let mut n = node();
        n.id = "123".into();
        assert_eq!(n.validate().unwrap_err().to_string(), "id not a valid uuid");
    }
}
