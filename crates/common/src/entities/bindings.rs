//! Join entities.
//!
//! Each record represents a many-to-many edge between a node and some
//! other entity. Their presence establishes a referential-integrity
//! edge: the parent entity cannot be deleted while a join row still
//! references it.

use serde::{Deserialize, Serialize};

use crate::validation::{self, ValidationError};

use super::Entity;

fn require_uuid(value: &str, message: &'static str) -> validation::Result {
    if validation::valid_uuid(value) {
        Ok(())
    } else {
        Err(ValidationError::new(message))
    }
}

macro_rules! join_entity {
    (
        $(#[$doc:meta])*
        $name:ident, $table:literal,
        uuid_fields: [$(($ufield:ident, $umsg:literal)),+ $(,)?],
        str_fields: [$(($sfield:ident, $smsg:literal)),* $(,)?]
    ) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            /// Record id.
            #[serde(default)]
            pub id: String,
            $(
                #[allow(missing_docs)]
                #[serde(default)]
                pub $ufield: String,
            )+
            $(
                #[allow(missing_docs)]
                #[serde(default)]
                pub $sfield: String,
            )*
        }

        impl Entity for $name {
            fn table_name(&self) -> &'static str {
                $table
            }

            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }

            fn validate(&self) -> validation::Result {
                require_uuid(&self.id, "id not a valid uuid")?;
                $(require_uuid(&self.$ufield, $umsg)?;)+
                $(
                    if self.$sfield.is_empty() {
                        return Err(ValidationError::new($smsg));
                    }
                )*
                Ok(())
            }

            fn filter_fields(&self) -> &'static [&'static str] {
                &[$(stringify!($ufield),)+ $(stringify!($sfield),)*]
            }

            fn field(&self, name: &str) -> Option<String> {
                match name {
                    $(stringify!($ufield) => Some(self.$ufield.clone()),)+
                    $(stringify!($sfield) => Some(self.$sfield.clone()),)*
                    _ => None,
                }
            }
        }
    };
}

join_entity!(
    /// Binds an application to a node it is deployed on.
    NodeApp, "nodes_apps",
    uuid_fields: [
        (node_id, "node_id not a valid uuid"),
        (app_id, "app_id not a valid uuid"),
    ],
    str_fields: []
);

join_entity!(
    /// Binds a DNS configuration to a node.
    NodeDnsConfig, "nodes_dns_configs",
    uuid_fields: [
        (node_id, "node_id not a valid uuid"),
        (dns_config_id, "dns_config_id not a valid uuid"),
    ],
    str_fields: []
);

join_entity!(
    /// Applies a traffic policy to an application deployed on a node.
    NodeAppTrafficPolicy, "nodes_apps_traffic_policies",
    uuid_fields: [
        (node_id, "node_id not a valid uuid"),
        (app_id, "app_id not a valid uuid"),
        (traffic_policy_id, "traffic_policy_id not a valid uuid"),
    ],
    str_fields: []
);

join_entity!(
    /// Applies a traffic policy to a network interface on a node.
    NodeInterfaceTrafficPolicy, "nodes_interfaces_traffic_policies",
    uuid_fields: [
        (node_id, "node_id not a valid uuid"),
        (traffic_policy_id, "traffic_policy_id not a valid uuid"),
    ],
    str_fields: [(interface_id, "interface_id cannot be empty")]
);

join_entity!(
    /// Places a network interface into a zone.
    ZoneInterface, "zones_interfaces",
    uuid_fields: [
        (node_id, "node_id not a valid uuid"),
        (zone_id, "zone_id not a valid uuid"),
    ],
    str_fields: [(interface_id, "interface_id cannot be empty")]
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_rows_validate_their_edges() {
        let row = NodeDnsConfig {
            id: "2fbbdfbc-0a2d-45cc-9557-04e32f40f626".into(),
            node_id: "ef51be63-e397-4e45-a2e7-ecb5c7c752ef".into(),
            dns_config_id: "6bf04732-7a3d-4a92-b4a5-8a6a4bbcd3f1".into(),
        };
        assert!(row.validate().is_ok());
        assert_eq!(row.table_name(), "nodes_dns_configs");
        assert_eq!(
            row.field("node_id").as_deref(),
            Some("ef51be63-e397-4e45-a2e7-ecb5c7c752ef")
        );

        let mut bad = row;
        bad.dns_config_id = "nope".into();
        assert_eq!(
            bad.validate().unwrap_err().to_string(),
            "dns_config_id not a valid uuid"
        );
    }

    #[test]
    fn interface_policies_accept_device_names() {
        let row = NodeInterfaceTrafficPolicy {
            id: "58363f36-0e03-4c0f-b1ed-d9b16cd79761".into(),
            node_id: "ef51be63-e397-4e45-a2e7-ecb5c7c752ef".into(),
            traffic_policy_id: "9d740cee-035f-4076-847c-d1c80cdf19db".into(),
            interface_id: "if0".into(),
        };
        assert!(row.validate().is_ok());
    }
}
