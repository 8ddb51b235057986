//! Tests for the EVM and WASM backends

use veil_compiler::{
    compile, compile_with, validate_wasm, CodegenConfig, CodegenError, CompileOptions, CompilerError,
    Target,
};
use veil_runtime::{StorageEntry, StorageKind};
use wasmparser::{Parser, Payload, TypeRef};

const TOKEN: &str = r#"
contract Token {
    uint256 public totalSupply;
    mapping(address => uint256) public balances;
    mapping(address => mapping(address => uint256)) public allowance;
    address owner;
    event Transfer(address from, address to, uint256 amount);

    circuit Solvent {
        private witness balance;
        public input amount;
        constraint amount <= balance;
    }

    function transfer(address to, uint256 amount) public returns (bool) {
        require(balances[msg.sender] >= amount, "insufficient balance");
        balances[msg.sender] -= amount;
        balances[to] += amount;
        emit Transfer(msg.sender, to, amount);
        return true;
    }

    function approve(address spender, uint256 amount) public {
        allowance[msg.sender][spender] = amount;
    }

    function mint(uint256 amount) public {
        require(msg.sender == owner, "not owner");
        totalSupply += fee(amount) + amount;
        balances[msg.sender] += amount;
    }

    function proveSolvent(uint256 amount, proof p) public circuit Solvent returns (bool) {
        return true;
    }

    function fee(uint256 amount) pure returns (uint256) {
        if (amount == 0) { return 0; }
        uint256 total = 0;
        for (uint256 i = 0; i < 3; i += 1) { total = total + amount % 7; }
        return total / 100;
    }

    mpc function audit(secret<uint256>[] bals, uint256 threshold) -> bool {
        secret<uint256> sum = 0;
        for (uint256 i = 0; i < bals.length; i += 1) { sum = sum + bals[i]; }
        return reveal(sum) >= threshold;
    }
}
"#;

const SIGNATURES: [&str; 8] = [
    "totalSupply()",
    "balances(address)",
    "allowance(address,address)",
    "transfer(address,uint256)",
    "approve(address,uint256)",
    "mint(uint256)",
    "proveSolvent(uint256,bytes32)",
    "audit(uint256,bool,bytes32)",
];

fn import_names(module: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    for payload in Parser::new(0).parse_all(module) {
        if let Payload::ImportSection(reader) = payload.unwrap() {
            for import in reader {
                let import = import.unwrap();
                let kind = match import.ty {
                    TypeRef::Func(_) => "func",
                    TypeRef::Memory(_) => "memory",
                    _ => "other",
                };
                names.push(format!("{}.{}:{kind}", import.module, import.name));
            }
        }
    }
    names
}

fn custom_sections(module: &[u8]) -> Vec<String> {
    Parser::new(0)
        .parse_all(module)
        .filter_map(|payload| match payload.unwrap() {
            Payload::CustomSection(reader) => Some(reader.name().to_string()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// CROSS-BACKEND PARITY TESTS
// ============================================================================

#[test]
fn test_abi_parity() {
    let evm = compile(TOKEN, Target::Evm).unwrap();
    let wasm = compile(TOKEN, Target::Wasm).unwrap();
    assert_eq!(evm.entry_names(), SIGNATURES.to_vec());
    assert_eq!(evm.entry_names(), wasm.entry_names());
}

#[test]
fn test_layout_parity() {
    let evm = compile(TOKEN, Target::Evm).unwrap();
    let wasm = compile(TOKEN, Target::Wasm).unwrap();
    let expected = vec![
        StorageEntry { name: "totalSupply".into(), slot: 0, kind: StorageKind::Value },
        StorageEntry { name: "balances".into(), slot: 1, kind: StorageKind::Mapping { depth: 1 } },
        StorageEntry { name: "allowance".into(), slot: 2, kind: StorageKind::Mapping { depth: 2 } },
        StorageEntry { name: "owner".into(), slot: 3, kind: StorageKind::Value },
    ];
    assert_eq!(evm.storage(), expected.as_slice());
    assert_eq!(evm.storage(), wasm.storage());
}

#[test]
fn test_revert_reasons_and_offchain_units_match() {
    let evm = compile(TOKEN, Target::Evm).unwrap();
    let wasm = compile(TOKEN, Target::Wasm).unwrap();
    assert_eq!(evm.revert_reasons(), &["insufficient balance".to_string(), "not owner".to_string()]);
    assert_eq!(evm.revert_reasons(), wasm.revert_reasons());
    assert_eq!(evm.offchain(), wasm.offchain());
    assert_eq!(evm.offchain().circuits[0].name, "Solvent");
    assert_eq!(evm.offchain().mpc[0].name, "audit");
}

#[test]
fn test_compilation_is_idempotent() {
    for target in [Target::Evm, Target::Wasm] {
        let first = compile(TOKEN, target).unwrap();
        let second = compile(TOKEN, target).unwrap();
        assert_eq!(first, second, "{target}");
    }
}

#[test]
fn test_sequential_matches_parallel() {
    let sequential = CompileOptions::default().sequential();
    for target in [Target::Evm, Target::Wasm] {
        let parallel = compile(TOKEN, target).unwrap();
        assert_eq!(compile_with(TOKEN, target, &sequential).unwrap(), parallel);
    }
}

#[test]
fn test_artifact_json_roundtrip() {
    let artifact = compile(TOKEN, Target::Evm).unwrap();
    let json = artifact.to_json().unwrap();
    assert_eq!(veil_runtime::Artifact::from_json(&json).unwrap(), artifact);
}

// ============================================================================
// EVM BACKEND TESTS
// ============================================================================

#[test]
fn test_evm_selector_table() {
    let artifact = compile(TOKEN, Target::Evm).unwrap();
    let evm = artifact.as_evm().unwrap();

    let transfer = evm.selectors.iter().find(|s| s.signature == "transfer(address,uint256)").unwrap();
    assert_eq!(transfer.selector_hex(), "0xa9059cbb");

    for entry in &evm.selectors {
        assert_eq!(evm.bytecode[entry.offset], 0x5b, "{} should start at a JUMPDEST", entry.signature);
        assert_eq!(entry.selector, veil_compiler::abi::selector(&entry.signature));
    }
    artifact.validate().unwrap();
}

#[test]
fn test_evm_deploy_code_wraps_runtime() {
    let artifact = compile(TOKEN, Target::Evm).unwrap();
    let evm = artifact.as_evm().unwrap();
    assert_eq!(evm.deploy_bytecode.len(), evm.bytecode.len() + 11);
    assert!(evm.deploy_bytecode.ends_with(&evm.bytecode));
    let len = evm.bytecode.len();
    assert_eq!(&evm.deploy_bytecode[..3], &[0x61, (len >> 8) as u8, len as u8]);
}

#[test]
fn test_evm_embeds_configured_verifier() {
    let mut options = CompileOptions::default();
    options.codegen.verifier_address = "0x00000000000000000000000000000000000000f7".parse().unwrap();
    let artifact = compile_with(TOKEN, Target::Evm, &options).unwrap();
    let bytecode = &artifact.as_evm().unwrap().bytecode;
    assert!(bytecode.windows(2).any(|w| w == [0x60, 0xf7]));
}

#[test]
fn test_evm_oversized_code_only_warns() {
    let options = CompileOptions {
        codegen: CodegenConfig { max_code_size: 16, ..CodegenConfig::default() },
        ..CompileOptions::default()
    };
    let artifact = compile_with(TOKEN, Target::Evm, &options).unwrap();
    assert!(artifact.bytes().len() > 16);
}

// ============================================================================
// WASM BACKEND TESTS
// ============================================================================

#[test]
fn test_wasm_module_validates() {
    let artifact = compile(TOKEN, Target::Wasm).unwrap();
    let module = &artifact.as_wasm().unwrap().module;
    wasmparser::validate(module).expect("module should pass wasmparser validation");
    validate_wasm(module).unwrap();
}

#[test]
fn test_wasm_host_imports() {
    let artifact = compile(TOKEN, Target::Wasm).unwrap();
    assert_eq!(
        import_names(artifact.bytes()),
        vec![
            "env.revert:func",
            "env.verify_proof:func",
            "env.verify_mpc:func",
            "env.mapping_slot:func",
            "env.mapping_load:func",
            "env.mapping_store:func",
            "env.emit_log:func",
            "env.msg_sender:func",
            "env.msg_value:func",
            "env.block_timestamp:func",
            "env.block_number:func",
            "env.memory:memory",
        ]
    );
}

#[test]
fn test_wasm_export_indices() {
    let artifact = compile(TOKEN, Target::Wasm).unwrap();
    let wasm = artifact.as_wasm().unwrap();
    let indices: Vec<u32> = wasm.exports.iter().map(|e| e.function_index).collect();
    // `fee` is private and takes index 18 without an export
    assert_eq!(indices, vec![11, 12, 13, 14, 15, 16, 17, 19]);
}

#[test]
fn test_wasm_metadata_section() {
    let with = compile(TOKEN, Target::Wasm).unwrap();
    assert_eq!(custom_sections(with.bytes()), vec!["veil_metadata".to_string()]);

    let options = CompileOptions {
        codegen: CodegenConfig { embed_metadata: false, ..CodegenConfig::default() },
        ..CompileOptions::default()
    };
    let without = compile_with(TOKEN, Target::Wasm, &options).unwrap();
    assert!(custom_sections(without.bytes()).is_empty());
}

#[test]
fn test_wasm_rejects_wide_literals_evm_accepts_them() {
    let source = "contract C {
        function big() public returns (uint256) { return 340282366920938463463374607431768211456; }
    }";
    assert!(compile(source, Target::Evm).is_ok());
    let err = compile(source, Target::Wasm).unwrap_err();
    assert!(matches!(err, CompilerError::Codegen(CodegenError::UnsupportedConstruct { .. })));
}

#[test]
fn test_empty_contract_on_both_targets() {
    for target in [Target::Evm, Target::Wasm] {
        let artifact = compile("contract Empty { }", target).unwrap();
        assert!(artifact.entry_names().is_empty());
        assert!(artifact.storage().is_empty());
        assert_eq!(artifact.contract(), "Empty");
    }
}
