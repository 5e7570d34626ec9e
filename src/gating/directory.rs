// Identity directory - who may sign, and which verification factors they hold

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

use super::normalize::normalize_name;

/// One of the two independently enrolled verification factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorSlot {
    Primary,
    Secondary,
}

impl std::fmt::Display for FactorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FactorSlot::Primary => f.write_str("primary"),
            FactorSlot::Secondary => f.write_str("secondary"),
        }
    }
}

/// Opaque verification secret. Never printed; serialized as hex.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(encoded.trim()).map(Secret)
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Secret::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationFactor {
    pub slot: FactorSlot,
    pub secret: Secret,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub sector: String,
    /// Administrative designation; compatible with any requested role
    #[serde(default)]
    pub elevated: bool,
    #[serde(default)]
    pub factors: Vec<VerificationFactor>,
}

impl Identity {
    pub fn new(name: &str, role: &str) -> Self {
        Self {
            name: name.to_string(),
            role: role.to_string(),
            sector: String::new(),
            elevated: false,
            factors: Vec::new(),
        }
    }

    pub fn with_factor(mut self, slot: FactorSlot, secret: Secret) -> Self {
        self.factors.retain(|f| f.slot != slot);
        self.factors.push(VerificationFactor {
            slot,
            secret,
            enabled: true,
        });
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    /// Enabled factors, at most one per slot
    pub fn enabled_factors(&self) -> Vec<&VerificationFactor> {
        let mut seen = Vec::with_capacity(2);
        self.factors
            .iter()
            .filter(|f| f.enabled && !f.secret.expose().is_empty())
            .filter(|f| {
                if seen.contains(&f.slot) {
                    false
                } else {
                    seen.push(f.slot);
                    true
                }
            })
            .collect()
    }
}

/// Lookup of signing identities.
///
/// Implementations may return a superset of the matching entries; the gating
/// authority applies the name and role rules itself.
pub trait IdentityDirectory: Send + Sync {
    fn find_by_name_and_role(&self, name: &str, role: Option<&str>) -> Vec<Identity>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryDirectory {
    #[serde(default)]
    identities: Vec<Identity>,
}

impl InMemoryDirectory {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    /// Load `[[identities]]` entries from a TOML file; a missing file is an empty directory
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(file = ?path, "No identity directory file, using empty directory");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading identity directory {}", path.display()))?;
        let directory: InMemoryDirectory = toml::from_str(&raw)
            .with_context(|| format!("parsing identity directory {}", path.display()))?;
        tracing::info!(
            file = ?path,
            identities = directory.identities.len(),
            "Identity directory loaded"
        );
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl IdentityDirectory for InMemoryDirectory {
    fn find_by_name_and_role(&self, name: &str, _role: Option<&str>) -> Vec<Identity> {
        let wanted = normalize_name(name);
        self.identities
            .iter()
            .filter(|identity| normalize_name(&identity.name) == wanted)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new(b"topsecret".to_vec());
        assert_eq!(format!("{secret:?}"), "Secret(<redacted>)");
    }

    #[test]
    fn test_directory_loads_from_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("directory.toml");
        std::fs::write(
            &path,
            r#"
[[identities]]
name = "Maria Lemos"
role = "Chefe De Gabinete"
sector = "sector-7"

[[identities.factors]]
slot = "primary"
secret = "3132333435363738393031323334353637383930"
"#,
        )
        .unwrap();

        let directory = InMemoryDirectory::load(&path).unwrap();
        assert_eq!(directory.len(), 1);
        let found = directory.find_by_name_and_role("maria  LEMOS", None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].enabled_factors().len(), 1);
        assert_eq!(found[0].factors[0].secret.expose(), b"12345678901234567890");
    }

    #[test]
    fn test_missing_directory_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let directory = InMemoryDirectory::load(&dir.path().join("absent.toml")).unwrap();
        assert!(directory.is_empty());
    }

    #[test]
    fn test_disabled_and_duplicate_factors_are_not_eligible() {
        let mut identity = Identity::new("Ana", "Pregoeira")
            .with_factor(FactorSlot::Primary, Secret::new(vec![1, 2, 3]));
        identity.factors.push(VerificationFactor {
            slot: FactorSlot::Secondary,
            secret: Secret::new(vec![4, 5, 6]),
            enabled: false,
        });
        identity.factors.push(VerificationFactor {
            slot: FactorSlot::Primary,
            secret: Secret::new(vec![7, 8, 9]),
            enabled: true,
        });
        let eligible = identity.enabled_factors();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].slot, FactorSlot::Primary);
    }
}
