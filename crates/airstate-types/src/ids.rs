// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

use std::fmt;

/// Opaque non-empty tenant namespace root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId(String);

/// Opaque non-empty document name, scoped inside an [`AppId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey(String);

/// Short server-generated id identifying a subscription session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

macro_rules! opaque_string_id {
    ($ty:ident) => {
        impl $ty {
            pub fn new(raw: impl Into<String>) -> Result<Self, crate::AirStateError> {
                let raw = raw.into();
                if raw.is_empty() {
                    return Err(crate::AirStateError::BadRequest(format!(
                        "{} must not be empty",
                        stringify!($ty)
                    )));
                }
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }
    };
}

opaque_string_id!(AppId);
opaque_string_id!(StateKey);

impl SessionId {
    /// Generates a fresh, short, url-safe session id.
    pub fn generate() -> Self {
        Self(bs58::encode(uuid::Uuid::new_v4().as_bytes()).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
