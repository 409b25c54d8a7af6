//! User account input.

use serde::{Deserialize, Serialize};

/// Fields for creating a user account.
///
/// Username and email uniqueness is the caller's responsibility; the
/// catalog stores whatever it is given once lengths check out.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_admin: bool,
}

impl NewUser {
    /// Minimal account with only the required fields.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn active(mut self) -> Self {
        self.is_active = true;
        self
    }

    /// Validate field lengths against the schema limits.
    pub fn validate(&self) -> crate::Result<()> {
        if self.username.trim().is_empty() {
            return Err(crate::Error::InvalidName(
                "username cannot be empty".to_string(),
            ));
        }
        let bounded = [
            ("username", Some(self.username.as_str())),
            ("email", Some(self.email.as_str())),
            ("first_name", self.first_name.as_deref()),
            ("last_name", self.last_name.as_deref()),
        ];
        for (field, value) in bounded {
            if let Some(value) = value
                && value.chars().count() > crate::USER_FIELD_MAX
            {
                return Err(crate::Error::InvalidName(format!(
                    "{field} exceeds {} characters",
                    crate::USER_FIELD_MAX
                )));
            }
        }
        if let Some(picture) = &self.picture
            && picture.len() > crate::PICTURE_MAX
        {
            return Err(crate::Error::InvalidName(format!(
                "picture reference exceeds {} bytes",
                crate::PICTURE_MAX
            )));
        }
        Ok(())
    }
}

/// Validate a project or dataset display name.
pub fn validate_resource_name(name: &str) -> crate::Result<()> {
    if name.trim().is_empty() {
        return Err(crate::Error::InvalidName("name cannot be empty".to_string()));
    }
    Ok(())
}
