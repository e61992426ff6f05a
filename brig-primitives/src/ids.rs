//! Identifier types.

use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

const MAX_PEER_ID_LEN: usize = 128;

/// Identity of a participant on the shared channel.
///
/// Peer ids are opaque strings chosen by the participant (or generated on its
/// behalf); the runtime only requires them to be non-empty and free of
/// whitespace.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a peer identifier after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPeerId`] if the identifier is empty, too long, or
    /// contains whitespace.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidPeerId {
                id,
                reason: "identifier cannot be empty".into(),
            });
        }
        if id.len() > MAX_PEER_ID_LEN {
            return Err(Error::InvalidPeerId {
                id,
                reason: format!("identifier length must be <= {MAX_PEER_ID_LEN}"),
            });
        }
        if id.chars().any(char::is_whitespace) {
            return Err(Error::InvalidPeerId {
                id,
                reason: "identifier cannot contain whitespace".into(),
            });
        }
        Ok(Self(id))
    }

    /// Generates a random peer identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Borrow<str> for PeerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<PeerId> for String {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

/// Token linking one invocation request to its one response.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random correlation id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an id received from the wire.
    #[must_use]
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CorrelationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_rejects_empty_and_whitespace() {
        assert!(matches!(
            PeerId::new(""),
            Err(Error::InvalidPeerId { .. })
        ));
        assert!(matches!(
            PeerId::new("island one"),
            Err(Error::InvalidPeerId { .. })
        ));
        assert_eq!(PeerId::new("island-1").unwrap().as_str(), "island-1");
    }

    #[test]
    fn peer_id_serializes_as_plain_string() {
        let id: PeerId = "lighthouse".parse().unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"lighthouse\"");
    }

    #[test]
    fn random_correlation_ids_differ() {
        assert_ne!(CorrelationId::random(), CorrelationId::random());
    }
}
