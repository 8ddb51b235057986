//! Code generation
//!
//! Two backends lower the same checked contract: [`EvmCodegen`] produces
//! runtime and deployment bytecode, [`WasmCodegen`] a binary module. Both take
//! their entry list from the shared [`ContractAbi`] and their slot numbers from
//! the shared [`StorageLayout`], so the two artifacts agree on names, order
//! and storage.

pub mod assembler;
pub mod evm;
pub mod wasm;

pub use evm::EvmCodegen;
pub use wasm::WasmCodegen;

use std::collections::HashMap;

use alloy_primitives::{address, Address};
use veil_runtime::{OffchainUnits, StorageKind};

use crate::abi::ContractAbi;
use crate::ast::{ContractDecl, Stmt, StmtKind};
use crate::error::CodegenError;
use crate::layout::StorageLayout;
use crate::semantic::SemanticModel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenConfig {
    /// Runtime bytecode size above which a warning is logged (EIP-170)
    pub max_code_size: usize,
    /// WASM module size above which a warning is logged
    pub max_module_size: usize,
    /// Embed the `veil_metadata` custom section in WASM modules
    pub embed_metadata: bool,
    /// Target of `verifyProof` calls
    pub verifier_address: Address,
    /// Target of `verifyMpc` calls
    pub mpc_verifier_address: Address,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            max_code_size: 24_576,
            max_module_size: 150_000,
            embed_metadata: true,
            verifier_address: address!("0000000000000000000000000000000000000a01"),
            mpc_verifier_address: address!("0000000000000000000000000000000000000a02"),
        }
    }
}

/// Everything a backend reads, produced by the earlier phases
#[derive(Debug, Clone, Copy)]
pub struct CodegenInput<'a> {
    pub contract: &'a ContractDecl,
    pub model: &'a SemanticModel,
    pub layout: &'a StorageLayout,
    pub abi: &'a ContractAbi,
}

impl<'a> CodegenInput<'a> {
    pub fn new(
        contract: &'a ContractDecl,
        model: &'a SemanticModel,
        layout: &'a StorageLayout,
        abi: &'a ContractAbi,
    ) -> Self {
        Self { contract, model, layout, abi }
    }

    pub(crate) fn offchain(&self) -> OffchainUnits {
        OffchainUnits { circuits: self.model.circuits.clone(), mpc: self.model.mpc.clone() }
    }

    /// Storage slot and mapping depth of a state name
    pub(crate) fn storage(&self, name: &str) -> Option<(u64, usize)> {
        self.layout.entry(name).map(|entry| match entry.kind {
            StorageKind::Value => (entry.slot, 0),
            StorageKind::Mapping { depth } => (entry.slot, depth),
        })
    }
}

/// Block-scoped local variable numbering
///
/// Parameters take indices `0..n` in order, then every declaration gets the
/// next free index. Indices are never reused within a function, so the total
/// is known up front from [`count_locals`].
#[derive(Debug, Default)]
pub(crate) struct Locals {
    scopes: Vec<HashMap<String, u32>>,
    next: u32,
}

impl Locals {
    pub(crate) fn new<'s>(params: impl IntoIterator<Item = &'s str>) -> Self {
        let mut locals = Self { scopes: vec![HashMap::new()], next: 0 };
        for name in params {
            locals.declare(name);
        }
        locals
    }

    pub(crate) fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub(crate) fn pop(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn declare(&mut self, name: &str) -> u32 {
        let index = self.next;
        self.next += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), index);
        }
        index
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<u32> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }
}

/// Number of local declarations anywhere in a block
pub(crate) fn count_locals(block: &[Stmt]) -> u32 {
    block
        .iter()
        .map(|stmt| match &stmt.kind {
            StmtKind::VarDecl { .. } => 1,
            StmtKind::If { then_block, else_block, .. } => {
                count_locals(then_block) + else_block.as_ref().map_or(0, |b| count_locals(b))
            }
            StmtKind::For { init, step, body, .. } => {
                let simple = |s: &Option<Box<Stmt>>| {
                    s.as_ref().map_or(0, |s| count_locals(std::slice::from_ref(s.as_ref())))
                };
                simple(init) + simple(step) + count_locals(body)
            }
            _ => 0,
        })
        .sum()
}

pub fn validate_wasm(wasm_bytes: &[u8]) -> Result<(), CodegenError> {
    if wasm_bytes.len() < 4 {
        return Err(CodegenError::InvalidModule("WASM too short".to_string()));
    }

    if wasm_bytes[0..4] != [0x00, 0x61, 0x73, 0x6d] {
        return Err(CodegenError::InvalidModule("Invalid WASM magic number".to_string()));
    }

    if wasm_bytes.len() < 8 {
        return Err(CodegenError::InvalidModule("WASM too short".to_string()));
    }

    if wasm_bytes[4..8] != [0x01, 0x00, 0x00, 0x00] {
        return Err(CodegenError::InvalidModule("Unsupported WASM version".to_string()));
    }

    wasmparser::validate(wasm_bytes)
        .map(|_| ())
        .map_err(|e| CodegenError::InvalidModule(format!("WASM validation failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;

    #[test]
    fn test_codegen_config_default() {
        let config = CodegenConfig::default();
        assert_eq!(config.max_code_size, 24_576);
        assert_eq!(config.max_module_size, 150_000);
        assert!(config.embed_metadata);
        assert_eq!(
            config.verifier_address.to_string().to_lowercase(),
            "0x0000000000000000000000000000000000000a01"
        );
        assert_ne!(config.verifier_address, config.mpc_verifier_address);
    }

    #[test]
    fn test_locals_shadowing() {
        let mut locals = Locals::new(["a", "b"]);
        assert_eq!(locals.lookup("b"), Some(1));

        locals.push();
        assert_eq!(locals.declare("a"), 2);
        assert_eq!(locals.lookup("a"), Some(2));
        locals.pop();

        assert_eq!(locals.lookup("a"), Some(0));
        assert_eq!(locals.declare("c"), 3);
        assert_eq!(locals.lookup("missing"), None);
    }

    #[test]
    fn test_count_locals_nested() {
        let contract = parse_tokens(
            &tokenize(
                "contract C {
                    function f(uint256 n) {
                        uint256 a = 1;
                        if (n > 0) { uint256 b = 2; } else { uint256 c; uint256 d; }
                        for (uint256 i = 0; i < n; i += 1) { uint256 e = i; }
                    }
                }",
            )
            .unwrap(),
        )
        .unwrap();
        let function = contract.function("f").unwrap();
        assert_eq!(count_locals(&function.body), 6);
    }

    #[test]
    fn test_validate_wasm_invalid_magic() {
        let invalid_wasm = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x00, 0x00];
        let result = validate_wasm(&invalid_wasm);
        assert!(result.unwrap_err().to_string().contains("magic number"));
    }

    #[test]
    fn test_validate_wasm_wrong_version() {
        let invalid_wasm = vec![0x00, 0x61, 0x73, 0x6d, 0x02, 0x00, 0x00, 0x00];
        assert!(validate_wasm(&invalid_wasm).is_err());
    }

    #[test]
    fn test_validate_wasm_too_short() {
        assert!(validate_wasm(&[0x00, 0x61]).is_err());
    }

    #[test]
    fn test_validate_empty_module() {
        let module = wasm_encoder::Module::new().finish();
        validate_wasm(&module).expect("empty module should be valid");
    }
}
