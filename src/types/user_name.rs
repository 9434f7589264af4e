// ABOUTME: Validated remote login user name.
// ABOUTME: Rejects values that could be read as ssh options or break temp paths.

use std::fmt;
use thiserror::Error;

/// Longest login name accepted (matches common `LOGIN_NAME_MAX` limits).
const MAX_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UserNameError {
    #[error("user name cannot be empty")]
    Empty,

    #[error("user name exceeds maximum length of 64 characters")]
    TooLong,

    #[error("user name cannot start with a hyphen")]
    StartsWithHyphen,

    #[error("invalid character in user name: {0:?}")]
    InvalidChar(char),
}

/// A remote account name, safe to pass as the value of `ssh -l`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserName(String);

impl UserName {
    pub fn new(value: &str) -> Result<Self, UserNameError> {
        if value.is_empty() {
            return Err(UserNameError::Empty);
        }

        if value.chars().count() > MAX_LEN {
            return Err(UserNameError::TooLong);
        }

        if value.starts_with('-') {
            return Err(UserNameError::StartsWithHyphen);
        }

        for c in value.chars() {
            if c.is_whitespace() || c.is_control() || c == '/' {
                return Err(UserNameError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for UserName {
    type Error = UserNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
