use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of the random salt mixed into a session id.
pub const SALT_LEN: usize = 16;

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(SessionId);
branded_id!(ConnectionId);

impl SessionId {
    /// Derive a candidate id for `alias`: `sha256("<alias>;<salt>")` as lowercase hex.
    ///
    /// The salt is fresh on every call, so the same alias yields a different
    /// candidate each time. Uniqueness across aliases is probabilistic.
    pub fn derive(alias: &str) -> Self {
        Self::derive_with_salt(alias, &random_salt())
    }

    pub fn derive_with_salt(alias: &str, salt: &str) -> Self {
        let digest = Sha256::digest(format!("{alias};{salt}").as_bytes());
        Self(format!("{digest:x}"))
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Random printable ASCII salt.
fn random_salt() -> String {
    let mut rng = rand::thread_rng();
    (0..SALT_LEN)
        .map(|_| char::from(rng.gen_range(0x20u8..=0x7e)))
        .collect()
}
