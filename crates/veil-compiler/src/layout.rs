//! Storage layout allocation
//!
//! One slot per state variable and per mapping, in declaration order. A
//! mapping's slot is the base of its derivation; entries live at
//! `keccak256(key . base)` on the EVM and behind the host's mapping imports
//! in WASM.

use tracing::{debug, instrument};
use veil_runtime::{StorageEntry, StorageKind};

use crate::ast::{ContractDecl, Item};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageLayout {
    pub entries: Vec<StorageEntry>,
}

impl StorageLayout {
    pub fn entry(&self, name: &str) -> Option<&StorageEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn slot(&self, name: &str) -> Option<u64> {
        self.entry(name).map(|e| e.slot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Assigns slots and writes them back onto the declarations
#[instrument(level = "debug", skip_all, fields(contract = %contract.name.name))]
pub fn allocate(contract: &mut ContractDecl) -> StorageLayout {
    let mut entries = Vec::new();
    for item in &mut contract.items {
        let slot = entries.len() as u64;
        let (name, kind) = match item {
            Item::StateVar(var) => {
                var.slot = Some(slot);
                (&var.name.name, StorageKind::Value)
            }
            Item::Mapping(mapping) => {
                mapping.slot = Some(slot);
                (&mapping.name.name, StorageKind::Mapping { depth: mapping.depth() })
            }
            _ => continue,
        };
        entries.push(StorageEntry { name: name.clone(), slot, kind });
    }
    debug!(slots = entries.len(), "allocated storage");
    StorageLayout { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;

    fn layout(source: &str) -> (ContractDecl, StorageLayout) {
        let mut contract = parse_tokens(&tokenize(source).unwrap()).unwrap();
        let layout = allocate(&mut contract);
        (contract, layout)
    }

    #[test]
    fn test_slots_follow_declaration_order() {
        let (_, layout) = layout(
            "contract C {
                uint256 total;
                function f() { }
                mapping(address => uint256) public balances;
                bool paused;
            }",
        );
        assert_eq!(layout.slot("total"), Some(0));
        assert_eq!(layout.slot("balances"), Some(1));
        assert_eq!(layout.slot("paused"), Some(2));
        assert_eq!(layout.entry("balances").unwrap().kind, StorageKind::Mapping { depth: 1 });
    }

    #[test]
    fn test_slots_written_back() {
        let (contract, _) = layout("contract C { uint256 a; uint256 b; }");
        let slots: Vec<_> = contract
            .items
            .iter()
            .filter_map(|item| match item {
                Item::StateVar(v) => v.slot,
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![0, 1]);
    }

    #[test]
    fn test_layout_is_deterministic() {
        let source = "contract C { uint256 a; mapping(uint256 => mapping(uint256 => bool)) m; }";
        assert_eq!(layout(source).1, layout(source).1);
    }
}
