use serde::{Deserialize, Serialize};

use crate::validation::{self, ValidationError};

use super::Entity;

/// A named network zone interfaces can be grouped into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkZone {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Operator-facing name.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

impl Entity for NetworkZone {
    fn table_name(&self) -> &'static str {
        "network_zones"
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
        Ok(())
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &[]
    }

    fn field(&self, _name: &str) -> Option<String> {
        None
    }
}
