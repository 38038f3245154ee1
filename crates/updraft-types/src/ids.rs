//! Strongly-typed identifiers for Updraft entities
//!
//! Version ids and source keys are opaque strings reported by upstream
//! sources; they are wrapped in newtypes so they cannot be mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The two families of artifacts Updraft tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Server runtime build
    Runtime,
    /// Plugin loaded by the runtime
    Plugin,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Runtime => "runtime",
            ArtifactKind::Plugin => "plugin",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown artifact kind
#[derive(Debug, Clone, Error)]
#[error("unknown artifact kind: {0}")]
pub struct ParseKindError(pub String);

impl FromStr for ArtifactKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "runtime" => Ok(ArtifactKind::Runtime),
            "plugin" => Ok(ArtifactKind::Plugin),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
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

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Stable source identifier of an artifact (plugin name, runtime line)
    ArtifactKey
);
string_id!(
    /// Opaque version id as reported by a source
    VersionId
);
string_id!(
    /// Configured server name
    ServerName
);
string_id!(
    /// Control-plane identifier of a running instance
    InstanceId
);
string_id!(
    /// Identity of a posted approval prompt in the chat transport
    MessageId
);

/// Full identity of an artifact record: `(kind, key)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId {
    pub kind: ArtifactKind,
    pub key: ArtifactKey,
}

impl ArtifactId {
    pub fn new(kind: ArtifactKind, key: impl Into<ArtifactKey>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    pub fn runtime(key: impl Into<ArtifactKey>) -> Self {
        Self::new(ArtifactKind::Runtime, key)
    }

    pub fn plugin(key: impl Into<ArtifactKey>) -> Self {
        Self::new(ArtifactKind::Plugin, key)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        assert_eq!("Runtime".parse::<ArtifactKind>().unwrap(), ArtifactKind::Runtime);
        assert_eq!(ArtifactKind::Plugin.to_string(), "plugin");
        assert!("datapack".parse::<ArtifactKind>().is_err());
    }

    #[test]
    fn test_artifact_id_display() {
        let id = ArtifactId::plugin("LuckPerms");
        assert_eq!(id.to_string(), "plugin/LuckPerms");
    }

    #[test]
    fn test_string_ids_serialize_transparently() {
        let version = VersionId::new("1.20-build5");
        assert_eq!(serde_json::to_string(&version).unwrap(), "\"1.20-build5\"");
    }
}
