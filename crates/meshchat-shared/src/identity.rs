use serde::{Deserialize, Serialize};

use crate::constants::{USERNAME_MAX_LEN, USERNAME_MIN_LEN};
use crate::error::IdentityError;
use crate::types::PeerId;

/// How the user joined. Only `Account` identities are remembered locally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Guest,
    Account,
}

/// Who this node is for the lifetime of one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub username: String,
    pub kind: IdentityKind,
    pub email: Option<String>,
}

impl PeerIdentity {
    /// Validate `username` and create a guest identity with a fresh id.
    pub fn guest(username: &str) -> Result<Self, IdentityError> {
        let username = username.trim();
        validate_username(username)?;
        Ok(Self {
            id: PeerId::random(),
            username: username.to_string(),
            kind: IdentityKind::Guest,
            email: None,
        })
    }

    /// Validate both fields and create an account identity with a fresh id.
    pub fn account(username: &str, email: &str) -> Result<Self, IdentityError> {
        let username = username.trim();
        let email = email.trim();
        validate_email(email)?;
        validate_username(username)?;
        Ok(Self {
            id: PeerId::random(),
            username: username.to_string(),
            kind: IdentityKind::Account,
            email: Some(email.to_string()),
        })
    }

    /// Name shown next to the user's own messages.
    pub fn display_name(&self) -> String {
        match self.kind {
            IdentityKind::Guest => format!("{} (Guest)", self.username),
            IdentityKind::Account => self.username.clone(),
        }
    }
}

pub fn validate_username(username: &str) -> Result<(), IdentityError> {
    if username.trim().is_empty() {
        return Err(IdentityError::EmptyUsername);
    }
    let len = username.chars().count();
    if len < USERNAME_MIN_LEN {
        return Err(IdentityError::UsernameTooShort {
            min: USERNAME_MIN_LEN,
        });
    }
    if len > USERNAME_MAX_LEN {
        return Err(IdentityError::UsernameTooLong {
            max: USERNAME_MAX_LEN,
        });
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(IdentityError::UsernameCharset);
    }
    Ok(())
}

/// Accepts `local@domain.tld`: one `@`, no whitespace, and a dot inside
/// the domain with something on both sides.
pub fn validate_email(email: &str) -> Result<(), IdentityError> {
    if email.trim().is_empty() {
        return Err(IdentityError::EmptyEmail);
    }
    if email.chars().any(char::is_whitespace) {
        return Err(IdentityError::InvalidEmail);
    }
    let (local, domain) = email.split_once('@').ok_or(IdentityError::InvalidEmail)?;
    if local.is_empty() || domain.contains('@') {
        return Err(IdentityError::InvalidEmail);
    }
    let has_inner_dot = domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len());
    if !has_inner_dot {
        return Err(IdentityError::InvalidEmail);
    }
    Ok(())
}
