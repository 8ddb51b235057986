//! External ABI shared by both backends
//!
//! Both code generators take their entry list, signatures, selectors, event
//! topics and revert codes from [`ContractAbi`]; neither derives them on its
//! own. This is what keeps the EVM selector table and the WASM export table
//! identical.

use alloy_primitives::{keccak256, B256};
use tracing::{debug, instrument};

use crate::ast::{
    Block, ContractDecl, FunctionDecl, Item, MpcFunctionDecl, Stmt, StmtKind, TypeName, Visibility,
};
use crate::layout::StorageLayout;

/// Plain `revert` with no reason
pub const REVERT_BARE: u64 = 0;
/// The verifier rejected a proof
pub const REVERT_PROOF_FAILED: u64 = 1;
/// Code of the first `require` message
pub const REVERT_FIRST_REASON: u64 = 2;

/// `name(t1,t2,...)`
pub fn signature<S: AsRef<str>>(name: &str, types: &[S]) -> String {
    let types: Vec<&str> = types.iter().map(AsRef::as_ref).collect();
    format!("{name}({})", types.join(","))
}

/// First four bytes of keccak256(signature)
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Getter of a public state variable or mapping
    Getter { storage: String, slot: u64, keys: usize },
    Function,
    /// On-chain acceptance stub of an `mpc function`
    MpcStub,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiEntry {
    /// Source name of the function, getter or MPC function
    pub name: String,
    pub signature: String,
    pub selector: [u8; 4],
    /// Canonical input types in calldata order
    pub inputs: Vec<String>,
    /// Canonical output types
    pub outputs: Vec<String>,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAbi {
    pub name: String,
    pub signature: String,
    pub topic: B256,
    pub arity: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractAbi {
    /// Entries in declaration order
    pub entries: Vec<AbiEntry>,
    pub events: Vec<EventAbi>,
    /// Distinct `require` messages in source order
    pub revert_reasons: Vec<String>,
}

impl ContractAbi {
    pub fn entry(&self, name: &str) -> Option<&AbiEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn event(&self, name: &str) -> Option<&EventAbi> {
        self.events.iter().find(|e| e.name == name)
    }

    /// Revert code of a `require`, [`REVERT_BARE`] when it has no message
    pub fn revert_code(&self, message: Option<&str>) -> u64 {
        message
            .and_then(|m| self.revert_reasons.iter().position(|r| r == m))
            .map_or(REVERT_BARE, |index| REVERT_FIRST_REASON + index as u64)
    }

    pub fn signatures(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.signature.as_str()).collect()
    }
}

fn entry(name: &str, inputs: Vec<String>, outputs: Vec<String>, kind: EntryKind) -> AbiEntry {
    let signature = signature(name, &inputs);
    AbiEntry { name: name.to_string(), selector: selector(&signature), signature, inputs, outputs, kind }
}

pub fn function_inputs(function: &FunctionDecl) -> Vec<String> {
    function.params.iter().map(|p| p.ty.canonical()).collect()
}

/// Plain inputs, then the claimed outputs, then the proof
pub fn mpc_stub_inputs(function: &MpcFunctionDecl) -> Vec<String> {
    function
        .plain_params
        .iter()
        .map(|p| p.ty.canonical())
        .chain(function.returns.iter().map(TypeName::canonical))
        .chain(std::iter::once(TypeName::Proof.canonical()))
        .collect()
}

#[instrument(level = "debug", skip_all, fields(contract = %contract.name.name))]
pub fn build_abi(contract: &ContractDecl, layout: &StorageLayout) -> ContractAbi {
    let mut abi = ContractAbi::default();

    for item in &contract.items {
        match item {
            Item::StateVar(var) if var.visibility == Visibility::Public => {
                let slot = layout.slot(&var.name.name).unwrap_or_default();
                abi.entries.push(entry(
                    &var.name.name,
                    Vec::new(),
                    vec![var.ty.canonical()],
                    EntryKind::Getter { storage: var.name.name.clone(), slot, keys: 0 },
                ));
            }
            Item::Mapping(mapping) if mapping.visibility == Visibility::Public => {
                let slot = layout.slot(&mapping.name.name).unwrap_or_default();
                let keys: Vec<String> = mapping.keys().iter().map(|k| k.canonical()).collect();
                let depth = keys.len();
                abi.entries.push(entry(
                    &mapping.name.name,
                    keys,
                    vec![mapping.value_type().canonical()],
                    EntryKind::Getter { storage: mapping.name.name.clone(), slot, keys: depth },
                ));
            }
            Item::Function(function) if function.is_public() => {
                abi.entries.push(entry(
                    &function.name.name,
                    function_inputs(function),
                    function.returns.iter().map(TypeName::canonical).collect(),
                    EntryKind::Function,
                ));
            }
            Item::MpcFunction(function) => {
                abi.entries.push(entry(
                    &function.name.name,
                    mpc_stub_inputs(function),
                    function.returns.iter().map(TypeName::canonical).collect(),
                    EntryKind::MpcStub,
                ));
            }
            Item::Event(event) => {
                let types: Vec<String> = event.params.iter().map(|p| p.ty.canonical()).collect();
                let signature = signature(&event.name.name, &types);
                abi.events.push(EventAbi {
                    name: event.name.name.clone(),
                    topic: event_topic(&signature),
                    signature,
                    arity: types.len(),
                });
            }
            _ => {}
        }
        if let Item::Function(function) = item {
            collect_reasons(&function.body, &mut abi.revert_reasons);
        }
    }

    debug!(entries = abi.entries.len(), events = abi.events.len(), "built abi");
    abi
}

fn collect_reasons(block: &Block, reasons: &mut Vec<String>) {
    for stmt in block {
        collect_stmt_reasons(stmt, reasons);
    }
}

fn collect_stmt_reasons(stmt: &Stmt, reasons: &mut Vec<String>) {
    match &stmt.kind {
        StmtKind::Require { message: Some(message), .. } => {
            if !reasons.contains(message) {
                reasons.push(message.clone());
            }
        }
        StmtKind::If { then_block, else_block, .. } => {
            collect_reasons(then_block, reasons);
            if let Some(else_block) = else_block {
                collect_reasons(else_block, reasons);
            }
        }
        StmtKind::For { init, step, body, .. } => {
            if let Some(init) = init {
                collect_stmt_reasons(init, reasons);
            }
            collect_reasons(body, reasons);
            if let Some(step) = step {
                collect_stmt_reasons(step, reasons);
            }
        }
        _ => {}
    }
}
