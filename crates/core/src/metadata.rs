//! Metadata key and value types.

use serde::{Deserialize, Serialize};
use std::fmt;

fn check_field(field: &str, value: &str) -> crate::Result<()> {
    if value.chars().count() > crate::METADATA_FIELD_MAX {
        return Err(crate::Error::InvalidMetadata(format!(
            "{field} exceeds {} characters",
            crate::METADATA_FIELD_MAX
        )));
    }
    Ok(())
}

/// Name of a metadata key. Keys are global and case-sensitive.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetadataKeyName(String);

impl MetadataKeyName {
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidMetadata(
                "key name cannot be empty".to_string(),
            ));
        }
        check_field("key name", &name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MetadataKeyName {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<MetadataKeyName> for String {
    fn from(name: MetadataKeyName) -> Self {
        name.0
    }
}

impl fmt::Debug for MetadataKeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetadataKeyName({})", self.0)
    }
}

impl fmt::Display for MetadataKeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value half of a metadata pair. May be empty.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetadataValue(String);

impl MetadataValue {
    pub fn new(value: impl Into<String>) -> crate::Result<Self> {
        let value = value.into();
        check_field("value", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MetadataValue {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<MetadataValue> for String {
    fn from(value: MetadataValue) -> Self {
        value.0
    }
}

impl fmt::Debug for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetadataValue({})", self.0)
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_case_sensitive() {
        let lower = MetadataKeyName::new("session").unwrap();
        let upper = MetadataKeyName::new("Session").unwrap();
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_key_limits() {
        assert!(MetadataKeyName::new("").is_err());
        assert!(MetadataKeyName::new("k".repeat(64)).is_ok());
        assert!(MetadataKeyName::new("k".repeat(65)).is_err());
    }

    #[test]
    fn test_value_may_be_empty() {
        assert_eq!(MetadataValue::new("").unwrap().as_str(), "");
        assert!(MetadataValue::new("v".repeat(65)).is_err());
    }
}
