//! Field validation primitives shared by every entity.

use std::fmt;
use std::net::IpAddr;

/// A validation failure with a JSON-style dotted field path.
///
/// Nested validators compose the path by prefixing, so a failure deep in
/// a traffic policy reads `rules[0].source.ip_filter.begin_port must be
/// in [0..65535]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(String);

impl ValidationError {
    /// Create an error from a message fragment (`"name cannot be empty"`).
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Prepend a path segment, joining with a dot.
    pub fn prefixed(self, segment: impl fmt::Display) -> Self {
        Self(format!("{segment}.{}", self.0))
    }

    /// The full message, path included.
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ValidationError {}

/// Shorthand result for validators.
pub type Result = std::result::Result<(), ValidationError>;

/// Check that an id is a canonically formatted UUID string.
pub fn valid_uuid(id: &str) -> bool {
    match uuid::Uuid::try_parse(id) {
        Ok(parsed) => parsed.to_string() == id,
        Err(_) => false,
    }
}

/// Validate an IP address string (v4 or v6).
pub fn parse_ip(address: &str) -> std::result::Result<IpAddr, ValidationError> {
    address
        .parse::<IpAddr>()
        .map_err(|_| ValidationError::new("address could not be parsed"))
}

/// Validate a MAC address.
///
/// Accepts the six-octet colon or hyphen notation
/// (`aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff`).
pub fn parse_mac(mac: &str) -> Result {
    let sep = if mac.contains(':') { ':' } else { '-' };
    let groups: Vec<&str> = mac.split(sep).collect();
    if groups.len() != 6
        || groups
            .iter()
            .any(|g| g.len() != 2 || !g.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return Err(ValidationError::new(format!(
            "could not be parsed (invalid MAC address {mac})"
        )));
    }
    Ok(())
}
