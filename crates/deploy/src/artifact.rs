//! Compiled contract artifacts and library linking.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    path::Path,
};

use alloy_core::primitives::{Address, Bytes};
use anyhow::Context;
use serde::Deserialize;

use crate::{error::ConfigError, topology::Topology};

const ADDRESS_LEN: usize = 20;

/// Location of one library placeholder inside the creation bytecode, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LinkOffset {
    pub start: usize,
    pub length: usize,
}

/// A Hardhat compilation artifact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    #[serde(default)]
    pub source_name: String,
    /// Creation bytecode as `0x`-prefixed hex, possibly with link placeholders.
    pub bytecode: String,
    /// Source file -> library name -> placeholder offsets.
    #[serde(default)]
    pub link_references: BTreeMap<String, BTreeMap<String, Vec<LinkOffset>>>,
}

impl Artifact {
    /// Fully qualified name (`path/File.sol:Contract`).
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }

    /// Library symbols the bytecode must be linked against.
    pub fn required_libraries(&self) -> BTreeSet<String> {
        self.link_references
            .iter()
            .flat_map(|(source, libs)| libs.keys().map(move |lib| format!("{source}:{lib}")))
            .collect()
    }

    /// Check that `symbols` matches exactly the libraries this artifact references.
    pub fn check_libraries<'a>(
        &self,
        contract: &str,
        symbols: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), ConfigError> {
        let required = self.required_libraries();
        let provided: BTreeSet<&String> = symbols.into_iter().collect();

        if let Some(symbol) = provided.iter().find(|s| !required.contains(s.as_str())) {
            return Err(ConfigError::UnexpectedLibrary {
                contract: contract.to_string(),
                symbol: symbol.to_string(),
            });
        }
        if let Some(symbol) = required.iter().find(|s| !provided.contains(s)) {
            return Err(ConfigError::UnlinkedLibrary {
                contract: contract.to_string(),
                symbol: symbol.clone(),
            });
        }
        Ok(())
    }

    /// Substitute library addresses into the creation bytecode.
    pub fn link(
        &self,
        contract: &str,
        libraries: &BTreeMap<String, Address>,
    ) -> Result<Bytes, ConfigError> {
        self.check_libraries(contract, libraries.keys())?;

        let code = self.bytecode.strip_prefix("0x").unwrap_or(&self.bytecode);
        if !code.is_ascii() {
            return Err(ConfigError::Invalid(format!(
                "bytecode of {} contains non-hex characters",
                self.contract_name
            )));
        }
        let mut code = code.as_bytes().to_vec();

        for (source, libs) in &self.link_references {
            for (lib, offsets) in libs {
                let symbol = format!("{source}:{lib}");
                let address = libraries.get(&symbol).ok_or_else(|| ConfigError::UnlinkedLibrary {
                    contract: contract.to_string(),
                    symbol: symbol.clone(),
                })?;
                let encoded = hex::encode(address.as_slice());

                for offset in offsets {
                    let span = offset
                        .start
                        .checked_mul(2)
                        .and_then(|start| Some((start, start.checked_add(ADDRESS_LEN * 2)?)))
                        .filter(|(_, end)| offset.length == ADDRESS_LEN && *end <= code.len());
                    let Some((start, end)) = span else {
                        return Err(ConfigError::Invalid(format!(
                            "invalid link reference for {symbol} in {} at byte {}",
                            self.contract_name, offset.start
                        )));
                    };
                    code[start..end].copy_from_slice(encoded.as_bytes());
                }
            }
        }

        hex::decode(&code).map(Bytes::from).map_err(|e| {
            ConfigError::Invalid(format!(
                "bytecode of {} is not valid hex after linking: {e}",
                self.contract_name
            ))
        })
    }
}

/// Artifacts indexed by contract name and by fully qualified name.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    artifacts: HashMap<String, Artifact>,
    ambiguous: HashSet<String>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every artifact under a Hardhat `artifacts/` directory.
    ///
    /// Only `<Contract>.json` files inside `<File>.sol/` directories are read, which
    /// skips `build-info/` and the `*.dbg.json` companions.
    pub fn load_dir(path: &Path) -> anyhow::Result<Self> {
        let mut store = Self::new();
        store.load_recursive(path)?;
        tracing::info!(
            path = %path.display(),
            count = store.len(),
            "Loaded contract artifacts"
        );
        Ok(store)
    }

    fn load_recursive(&mut self, dir: &Path) -> anyhow::Result<()> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read artifacts directory {}", dir.display()))?;

        for entry in entries {
            let path = entry.context("Failed to read directory entry")?.path();
            if path.is_dir() {
                self.load_recursive(&path)?;
                continue;
            }

            let in_source_dir = dir
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".sol"));
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !in_source_dir || !file_name.ends_with(".json") || file_name.ends_with(".dbg.json") {
                continue;
            }

            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read artifact {}", path.display()))?;
            let artifact: Artifact = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse artifact {}", path.display()))?;
            tracing::trace!(contract = %artifact.contract_name, path = %path.display(), "Artifact found");
            self.insert(artifact);
        }
        Ok(())
    }

    /// Add an artifact. Two artifacts sharing a contract name are only reachable
    /// by their fully qualified names afterwards.
    pub fn insert(&mut self, artifact: Artifact) {
        let name = artifact.contract_name.clone();
        if !artifact.source_name.is_empty() {
            self.artifacts.insert(artifact.qualified_name(), artifact.clone());
        }

        if self.ambiguous.contains(&name) {
            return;
        }
        if self.artifacts.contains_key(&name) {
            tracing::warn!(contract = %name, "Multiple artifacts share this name, use the qualified name");
            self.artifacts.remove(&name);
            self.ambiguous.insert(name);
            return;
        }
        self.artifacts.insert(name, artifact);
    }

    pub fn get(&self, name: &str) -> Result<&Artifact, ConfigError> {
        if self.ambiguous.contains(name) {
            return Err(ConfigError::Invalid(format!(
                "artifact name `{name}` is ambiguous, use `path/File.sol:{name}`"
            )));
        }
        self.artifacts
            .get(name)
            .ok_or_else(|| ConfigError::MissingArtifact(name.to_string()))
    }

    /// Number of distinct artifacts.
    pub fn len(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|(key, artifact)| artifact.source_name.is_empty() || key.contains(':'))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Check that every spec the run may deploy has an artifact with matching links.
    pub fn verify(&self, topology: &Topology) -> Result<(), ConfigError> {
        for spec in topology.contracts.iter().filter(|s| !s.is_attached()) {
            self.get(&spec.artifact)?
                .check_libraries(&spec.name, spec.libraries.keys())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ContractSpec;
    use tempdir::TempDir;

    const SQRT: &str = "contracts/lib/SqrtMath.sol:SqrtMath";

    fn farm_artifact() -> Artifact {
        // 2 bytes of code, a 20-byte placeholder, then 1 trailing byte.
        let placeholder = "__$0123456789abcdef0123456789abcdef01$__";
        Artifact {
            contract_name: "SnackShack".to_string(),
            source_name: "contracts/SnackShack.sol".to_string(),
            bytecode: format!("0x6080{placeholder}00"),
            link_references: BTreeMap::from([(
                "contracts/lib/SqrtMath.sol".to_string(),
                BTreeMap::from([(
                    "SqrtMath".to_string(),
                    vec![LinkOffset { start: 2, length: 20 }],
                )]),
            )]),
        }
    }

    #[test]
    fn test_link_substitutes_address() {
        let artifact = farm_artifact();
        let lib = Address::repeat_byte(0xab);

        let code = artifact
            .link("farm", &BTreeMap::from([(SQRT.to_string(), lib)]))
            .unwrap();

        assert_eq!(code.len(), 23);
        assert_eq!(&code[..2], &[0x60, 0x80]);
        assert_eq!(&code[2..22], lib.as_slice());
        assert_eq!(code[22], 0x00);
    }

    #[test]
    fn test_link_requires_every_reference() {
        let err = farm_artifact().link("farm", &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnlinkedLibrary {
                contract: "farm".to_string(),
                symbol: SQRT.to_string()
            }
        );
    }

    #[test]
    fn test_link_rejects_malformed_bytecode_and_offsets() {
        let libraries = BTreeMap::from([(SQRT.to_string(), Address::repeat_byte(0xab))]);

        let mut artifact = farm_artifact();
        artifact.bytecode = "0x6080é__$0123456789abcdef0123456789abcdef01$__00".to_string();
        assert!(matches!(artifact.link("farm", &libraries), Err(ConfigError::Invalid(_))));

        for start in [usize::MAX, usize::MAX / 2, 4] {
            let mut artifact = farm_artifact();
            artifact.link_references = BTreeMap::from([(
                "contracts/lib/SqrtMath.sol".to_string(),
                BTreeMap::from([("SqrtMath".to_string(), vec![LinkOffset { start, length: 20 }])]),
            )]);
            assert!(
                matches!(artifact.link("farm", &libraries), Err(ConfigError::Invalid(_))),
                "offset {start} must be rejected"
            );
        }
    }

    #[test]
    fn test_link_rejects_unreferenced_library() {
        let artifact = Artifact {
            contract_name: "SnackToken".to_string(),
            source_name: "contracts/SnackToken.sol".to_string(),
            bytecode: "0x6080".to_string(),
            link_references: BTreeMap::new(),
        };
        let err = artifact
            .link("snack_token", &BTreeMap::from([(SQRT.to_string(), Address::ZERO)]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnexpectedLibrary { .. }));
    }

    #[test]
    fn test_ambiguous_names_require_qualified_lookup() {
        let mut store = ArtifactStore::new();
        let mut a = farm_artifact();
        a.contract_name = "Ownable".to_string();
        a.source_name = "contracts/a/Ownable.sol".to_string();
        let mut b = a.clone();
        b.source_name = "contracts/b/Ownable.sol".to_string();

        store.insert(a);
        store.insert(b);

        assert!(matches!(store.get("Ownable"), Err(ConfigError::Invalid(_))));
        assert!(store.get("contracts/b/Ownable.sol:Ownable").is_ok());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_verify_checks_deployed_specs_only() {
        let mut store = ArtifactStore::new();
        store.insert(farm_artifact());

        let ok = Topology::new(
            vec![
                ContractSpec::attach("sqrt_math", "SqrtMath", Address::with_last_byte(1)),
                ContractSpec::deploy("farm", "SnackShack").link(SQRT, "sqrt_math"),
            ],
            vec![],
        );
        assert!(store.verify(&ok).is_ok());

        let missing_link = Topology::new(vec![ContractSpec::deploy("farm", "SnackShack")], vec![]);
        assert!(matches!(
            store.verify(&missing_link),
            Err(ConfigError::UnlinkedLibrary { .. })
        ));
    }

    #[test]
    fn test_load_dir_skips_debug_and_build_info() {
        let dir = TempDir::new("shack-artifacts").expect("Failed to create temp dir");
        let source_dir = dir.path().join("contracts/SnackShack.sol");
        let build_info = dir.path().join("build-info");
        std::fs::create_dir_all(&source_dir).unwrap();
        std::fs::create_dir_all(&build_info).unwrap();

        let json = serde_json::json!({
            "contractName": "SnackShack",
            "sourceName": "contracts/SnackShack.sol",
            "abi": [],
            "bytecode": "0x6080",
            "linkReferences": {}
        });
        std::fs::write(source_dir.join("SnackShack.json"), json.to_string()).unwrap();
        std::fs::write(source_dir.join("SnackShack.dbg.json"), "{\"buildInfo\": \"x\"}").unwrap();
        std::fs::write(build_info.join("abc.json"), "{\"id\": \"abc\"}").unwrap();

        let store = ArtifactStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("SnackShack").unwrap().bytecode, "0x6080");
    }
}
