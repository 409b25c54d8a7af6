//! Image path type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Path of a QA image as stored by the file layer.
///
/// The path identifies the image content: two entities attaching the same
/// path share one image row.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImagePath(String);

impl ImagePath {
    /// Create from a string, validating length and characters.
    pub fn new(path: impl Into<String>) -> crate::Result<Self> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(crate::Error::InvalidImagePath(
                "path cannot be empty".to_string(),
            ));
        }
        if path.len() > crate::PATH_MAX {
            return Err(crate::Error::InvalidImagePath(format!(
                "path is {} bytes, limit is {}",
                path.len(),
                crate::PATH_MAX
            )));
        }
        if path.chars().any(|c| c == '\0' || c.is_control()) {
            return Err(crate::Error::InvalidImagePath(
                "path contains control characters".to_string(),
            ));
        }
        Ok(Self(path))
    }

    /// Get the path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ImagePath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<ImagePath> for String {
    fn from(path: ImagePath) -> Self {
        path.0
    }
}

impl fmt::Debug for ImagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImagePath({})", self.0)
    }
}

impl fmt::Display for ImagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_path() {
        let path = ImagePath::new("sub-01/ses-01/anat/T1w_qc.svg").unwrap();
        assert_eq!(path.as_str(), "sub-01/ses-01/anat/T1w_qc.svg");
    }

    #[test]
    fn test_rejects_empty_and_long() {
        assert!(ImagePath::new("").is_err());
        assert!(ImagePath::new("   ").is_err());
        assert!(ImagePath::new("a".repeat(crate::PATH_MAX + 1)).is_err());
        assert!(ImagePath::new("a".repeat(crate::PATH_MAX)).is_ok());
    }

    #[test]
    fn test_rejects_control_chars() {
        assert!(ImagePath::new("qc\n.svg").is_err());
    }
}
