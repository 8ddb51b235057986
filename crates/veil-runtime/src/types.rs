//! Compiled artifact types
//!
//! Both backends produce an artifact carrying the same logical ABI: the
//! selector table of the EVM artifact and the export table of the WASM
//! artifact are keyed by the same canonical signature strings, in the same
//! order, and both embed the same storage layout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constraint::ConstraintSystem;
use crate::error::{Result, VeilError};
use crate::mpc::MpcDescriptor;

/// Compilation target
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Evm,
    Wasm,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evm => f.write_str("evm"),
            Self::Wasm => f.write_str("wasm"),
        }
    }
}

impl FromStr for Target {
    type Err = VeilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "evm" => Ok(Self::Evm),
            "wasm" => Ok(Self::Wasm),
            other => Err(VeilError::UnknownTarget(other.to_string())),
        }
    }
}

/// Storage shape of one state variable
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageKind {
    /// Stored directly at `slot`
    Value,
    /// Entries derived from `slot` and `depth` keys at access time
    Mapping { depth: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageEntry {
    pub name: String,
    pub slot: u64,
    #[serde(flatten)]
    pub kind: StorageKind,
}

/// One row of the EVM dispatch table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectorEntry {
    /// Canonical signature, e.g. `transfer(address,uint256)`
    pub signature: String,
    pub selector: [u8; 4],
    /// Byte offset of the entry point in the runtime bytecode
    pub offset: usize,
}

impl SelectorEntry {
    pub fn selector_hex(&self) -> String {
        format!("0x{}", hex::encode(self.selector))
    }
}

/// One row of the WASM export table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportEntry {
    /// Canonical signature, identical to the EVM selector table key
    pub name: String,
    pub function_index: u32,
}

/// Off-chain material shared by both artifact shapes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OffchainUnits {
    pub circuits: Vec<ConstraintSystem>,
    pub mpc: Vec<MpcDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvmArtifact {
    pub contract: String,
    /// Runtime bytecode
    pub bytecode: Vec<u8>,
    /// Init code that returns `bytecode` when deployed
    pub deploy_bytecode: Vec<u8>,
    pub selectors: Vec<SelectorEntry>,
    pub storage: Vec<StorageEntry>,
    /// `require` messages; revert code `n` maps to entry `n - 1`
    pub revert_reasons: Vec<String>,
    pub offchain: OffchainUnits,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WasmArtifact {
    pub contract: String,
    /// Binary module
    pub module: Vec<u8>,
    pub exports: Vec<ExportEntry>,
    pub storage: Vec<StorageEntry>,
    pub revert_reasons: Vec<String>,
    pub offchain: OffchainUnits,
}

/// Output of a successful compilation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Artifact {
    Evm(EvmArtifact),
    Wasm(WasmArtifact),
}

impl Artifact {
    pub fn target(&self) -> Target {
        match self {
            Self::Evm(_) => Target::Evm,
            Self::Wasm(_) => Target::Wasm,
        }
    }

    pub fn contract(&self) -> &str {
        match self {
            Self::Evm(a) => &a.contract,
            Self::Wasm(a) => &a.contract,
        }
    }

    /// Deployable bytes: runtime bytecode or binary module
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Evm(a) => &a.bytecode,
            Self::Wasm(a) => &a.module,
        }
    }

    /// Selector or export table keys in table order
    pub fn entry_names(&self) -> Vec<&str> {
        match self {
            Self::Evm(a) => a.selectors.iter().map(|s| s.signature.as_str()).collect(),
            Self::Wasm(a) => a.exports.iter().map(|e| e.name.as_str()).collect(),
        }
    }

    pub fn storage(&self) -> &[StorageEntry] {
        match self {
            Self::Evm(a) => &a.storage,
            Self::Wasm(a) => &a.storage,
        }
    }

    pub fn revert_reasons(&self) -> &[String] {
        match self {
            Self::Evm(a) => &a.revert_reasons,
            Self::Wasm(a) => &a.revert_reasons,
        }
    }

    pub fn offchain(&self) -> &OffchainUnits {
        match self {
            Self::Evm(a) => &a.offchain,
            Self::Wasm(a) => &a.offchain,
        }
    }

    pub fn as_evm(&self) -> Option<&EvmArtifact> {
        match self {
            Self::Evm(a) => Some(a),
            Self::Wasm(_) => None,
        }
    }

    pub fn as_wasm(&self) -> Option<&WasmArtifact> {
        match self {
            Self::Wasm(a) => Some(a),
            Self::Evm(_) => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decodes an artifact and checks its tables against each other
    pub fn from_json(json: &str) -> Result<Self> {
        let artifact: Self = serde_json::from_str(json)?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Checks internal consistency of the tables
    pub fn validate(&self) -> Result<()> {
        let mut names = std::collections::HashSet::new();
        for name in self.entry_names() {
            if !names.insert(name) {
                return Err(VeilError::invalid_artifact(format!("duplicate entry `{name}`")));
            }
        }

        match self {
            Self::Evm(a) => {
                if let Some(entry) = a.selectors.iter().find(|s| s.offset >= a.bytecode.len()) {
                    return Err(VeilError::invalid_artifact(format!(
                        "entry `{}` points past the end of the bytecode ({} >= {})",
                        entry.signature,
                        entry.offset,
                        a.bytecode.len()
                    )));
                }
            }
            Self::Wasm(a) => {
                if a.module.len() < 8 || a.module[0..4] != [0x00, 0x61, 0x73, 0x6d] {
                    return Err(VeilError::invalid_artifact("module is missing the WASM header"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse() {
        assert_eq!("evm".parse::<Target>().unwrap(), Target::Evm);
        assert_eq!("WASM".parse::<Target>().unwrap(), Target::Wasm);
        assert!("native".parse::<Target>().is_err());
    }

    #[test]
    fn test_target_display() {
        assert_eq!(Target::Evm.to_string(), "evm");
        assert_eq!(Target::Wasm.to_string(), "wasm");
    }

    #[test]
    fn test_selector_hex() {
        let entry = SelectorEntry {
            signature: "deposit()".into(),
            selector: [0xd0, 0xe3, 0x0d, 0xb0],
            offset: 0,
        };
        assert_eq!(entry.selector_hex(), "0xd0e30db0");
    }
}
