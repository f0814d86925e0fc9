use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("JSON encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("JSON decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Username cannot be empty")]
    EmptyUsername,

    #[error("Username must be at least {min} characters")]
    UsernameTooShort { min: usize },

    #[error("Username must be {max} characters or less")]
    UsernameTooLong { max: usize },

    #[error("Username can only contain letters, numbers, hyphens, and underscores")]
    UsernameCharset,

    #[error("Email cannot be empty")]
    EmptyEmail,

    #[error("Please enter a valid email address")]
    InvalidEmail,
}
