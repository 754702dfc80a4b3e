//! Cardano native-asset identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a native asset by minting policy and hex-encoded asset name.
///
/// ADA is the empty policy/name pair. The name stays hex encoded; display
/// decodes it only when it is valid UTF-8.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId {
    pub policy_id: String,
    pub name: String,
}

/// A policy id is always 28 bytes, 56 hex characters.
const POLICY_HEX_LEN: usize = 56;

impl AssetId {
    pub fn new(policy_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            name: name.into(),
        }
    }

    pub fn ada() -> Self {
        Self {
            policy_id: String::new(),
            name: String::new(),
        }
    }

    pub fn is_ada(&self) -> bool {
        self.policy_id.is_empty() && self.name.is_empty()
    }

    /// Parse from a concatenated unit string (`<policy><name>` or
    /// `<policy>.<name>`), as emitted by most indexers. `"lovelace"`, `"."`
    /// and the empty string all mean ADA.
    pub fn from_unit(unit: &str) -> Self {
        if unit.is_empty() || unit == "lovelace" || unit == "." {
            return Self::ada();
        }
        let joined: String = if unit.contains('.') {
            unit.replace('.', "")
        } else {
            unit.to_string()
        };
        if joined.len() <= POLICY_HEX_LEN {
            return Self::new(joined, "");
        }
        Self::new(&joined[..POLICY_HEX_LEN], &joined[POLICY_HEX_LEN..])
    }

    /// Concatenated `<policy><name>` form; `"lovelace"` for ADA.
    pub fn unit(&self) -> String {
        if self.is_ada() {
            return "lovelace".to_string();
        }
        format!("{}{}", self.policy_id, self.name)
    }

    /// Asset name decoded as UTF-8 when possible, hex otherwise.
    pub fn readable_name(&self) -> String {
        match hex::decode(&self.name) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) if !text.is_empty() => text,
                _ => self.name.clone(),
            },
            Err(_) => self.name.clone(),
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ada() {
            return write!(f, "ADA");
        }
        let policy = &self.policy_id[..self.policy_id.len().min(8)];
        write!(f, "{}..{}", policy, self.readable_name())
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ada_roundtrip() {
        assert!(AssetId::ada().is_ada());
        assert!(AssetId::from_unit("lovelace").is_ada());
        assert!(AssetId::from_unit("").is_ada());
        assert_eq!(AssetId::ada().unit(), "lovelace");
    }

    #[test]
    fn unit_parsing_splits_policy_and_name() {
        let policy = "29d222ce763455e3d7a09a665ce554f00ac89d2e99a1a83d267170c6";
        let unit = format!("{policy}4d494e");
        let asset = AssetId::from_unit(&unit);
        assert_eq!(asset.policy_id, policy);
        assert_eq!(asset.name, "4d494e");
        assert_eq!(asset.unit(), unit);
    }

    #[test]
    fn dot_separator_accepted() {
        let policy = "29d222ce763455e3d7a09a665ce554f00ac89d2e99a1a83d267170c6";
        let asset = AssetId::from_unit(&format!("{policy}.4d494e"));
        assert_eq!(asset.policy_id, policy);
        assert_eq!(asset.name, "4d494e");
    }

    #[test]
    fn display_decodes_utf8_names() {
        let asset = AssetId::new(
            "29d222ce763455e3d7a09a665ce554f00ac89d2e99a1a83d267170c6",
            "4d494e",
        );
        assert_eq!(asset.to_string(), "29d222ce..MIN");
    }
}
