//! Known peers, persisted as a TOML file keyed by node name.

use crate::utils::Hash;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read node registry {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write node registry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse node registry: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to encode node registry: {0}")]
    Encode(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkNodeAddress {
    pub ip: String,
    pub port: u16,
}

impl NetworkNodeAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        NetworkNodeAddress {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for NetworkNodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub name: String,
    pub is_bootstrap: bool,
    pub is_active: bool,
}

/// What a peer reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkNodeStatus {
    pub hash: Hash,
    pub height: u64,
    pub known_peers: HashMap<NetworkNodeAddress, NetworkNode>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(rename = "Nodes", default)]
    nodes: BTreeMap<String, NodeRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Is_bootstrap", default)]
    is_bootstrap: bool,
    #[serde(rename = "Is_active", default)]
    is_active: bool,
}

pub struct NodeRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl NodeRegistry {
    /// Opens an existing registry file and checks that it parses.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let registry = NodeRegistry {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        };
        let nodes = registry.list()?;
        debug!(path = %registry.path.display(), nodes = nodes.len(), "node registry opened");
        Ok(registry)
    }

    pub fn list(&self) -> Result<HashMap<NetworkNodeAddress, NetworkNode>, RegistryError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let file = self.read()?;
        Ok(file
            .nodes
            .into_iter()
            .map(|(name, record)| {
                (
                    NetworkNodeAddress::new(record.address, record.port),
                    NetworkNode {
                        name,
                        is_bootstrap: record.is_bootstrap,
                        is_active: record.is_active,
                    },
                )
            })
            .collect())
    }

    /// Adds every node whose address is not registered yet and returns how
    /// many were added. Existing entries are left as they are.
    pub fn merge(
        &self,
        nodes: impl IntoIterator<Item = (NetworkNodeAddress, NetworkNode)>,
    ) -> Result<usize, RegistryError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read()?;
        let mut added = 0;
        for (address, node) in nodes {
            let known = file
                .nodes
                .values()
                .any(|record| record.address == address.ip && record.port == address.port);
            if known {
                continue;
            }
            // Names are table keys; fall back to the address on a clash.
            let name = if file.nodes.contains_key(&node.name) || node.name.is_empty() {
                address.to_string()
            } else {
                node.name
            };
            file.nodes.insert(
                name,
                NodeRecord {
                    address: address.ip,
                    port: address.port,
                    is_bootstrap: node.is_bootstrap,
                    is_active: node.is_active,
                },
            );
            added += 1;
        }
        if added > 0 {
            self.write(&file)?;
        }
        Ok(added)
    }

    fn read(&self) -> Result<RegistryFile, RegistryError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| RegistryError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    fn write(&self, file: &RegistryFile) -> Result<(), RegistryError> {
        let encoded = toml::to_string(file)?;
        fs::write(&self.path, encoded).map_err(|source| RegistryError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"
[Nodes.bootstrap]
Address = "127.0.0.1"
Port = 8080
Is_bootstrap = true
Is_active = true

[Nodes.friend]
Address = "10.0.0.2"
Port = 8081
Is_bootstrap = false
Is_active = false
"#;

    fn registry() -> (tempfile::TempDir, NodeRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.toml");
        fs::write(&path, REGISTRY).unwrap();
        let registry = NodeRegistry::open(&path).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_list_parses_records() {
        let (_dir, registry) = registry();
        let nodes = registry.list().unwrap();
        assert_eq!(nodes.len(), 2);
        let bootstrap = &nodes[&NetworkNodeAddress::new("127.0.0.1", 8080)];
        assert_eq!(bootstrap.name, "bootstrap");
        assert!(bootstrap.is_bootstrap && bootstrap.is_active);
        assert!(!nodes[&NetworkNodeAddress::new("10.0.0.2", 8081)].is_active);
    }

    #[test]
    fn test_merge_adds_only_unknown_addresses() {
        let (_dir, registry) = registry();
        let fresh = NetworkNode {
            name: "newcomer".into(),
            is_bootstrap: false,
            is_active: true,
        };
        let added = registry
            .merge([
                (NetworkNodeAddress::new("127.0.0.1", 8080), fresh.clone()),
                (NetworkNodeAddress::new("10.0.0.3", 9000), fresh.clone()),
            ])
            .unwrap();
        assert_eq!(added, 1);

        let nodes = registry.list().unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[&NetworkNodeAddress::new("10.0.0.3", 9000)], fresh);
        assert_eq!(nodes[&NetworkNodeAddress::new("127.0.0.1", 8080)].name, "bootstrap");
    }

    #[test]
    fn test_merge_renames_on_name_clash() {
        let (_dir, registry) = registry();
        let clash = NetworkNode {
            name: "friend".into(),
            is_bootstrap: false,
            is_active: true,
        };
        let address = NetworkNodeAddress::new("10.0.0.4", 7000);
        registry.merge([(address.clone(), clash)]).unwrap();
        assert_eq!(registry.list().unwrap()[&address].name, "10.0.0.4:7000");
    }

    #[test]
    fn test_open_fails_on_missing_or_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            NodeRegistry::open(dir.path().join("missing.toml")),
            Err(RegistryError::Read { .. })
        ));
        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "[Nodes.x]\nPort = \"eighty\"\n").unwrap();
        assert!(matches!(
            NodeRegistry::open(&broken),
            Err(RegistryError::Parse(_))
        ));
    }

    #[test]
    fn test_address_display_and_order() {
        let a = NetworkNodeAddress::new("10.0.0.1", 9000);
        let b = NetworkNodeAddress::new("10.0.0.1", 9001);
        assert_eq!(a.to_string(), "10.0.0.1:9000");
        assert!(a < b);
    }
}
