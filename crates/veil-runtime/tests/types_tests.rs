//! Integration tests for artifact and off-chain unit types in veil-runtime

use alloy_primitives::U256;
use veil_runtime::{
    Artifact, ArithOp, Comparison, Constraint, ConstraintSystem, EvmArtifact, ExportEntry, MpcDescriptor,
    MpcInput, MpcOp, MpcOperand, OffchainUnits, Operand, Polynomial, Predicate, SelectorEntry,
    SignalKind, StorageEntry, StorageKind, Target, Term, Variable, VeilError, WasmArtifact,
};

fn storage() -> Vec<StorageEntry> {
    vec![
        StorageEntry { name: "total".into(), slot: 0, kind: StorageKind::Value },
        StorageEntry { name: "balances".into(), slot: 1, kind: StorageKind::Mapping { depth: 1 } },
    ]
}

fn evm_artifact() -> EvmArtifact {
    EvmArtifact {
        contract: "Token".into(),
        bytecode: vec![0x5b, 0x00, 0x5b, 0x00],
        deploy_bytecode: vec![0x00],
        selectors: vec![
            SelectorEntry { signature: "total()".into(), selector: [0x2d, 0xdb, 0xd1, 0x3a], offset: 0 },
            SelectorEntry { signature: "balances(address)".into(), selector: [0x27, 0xe2, 0x35, 0xe3], offset: 2 },
        ],
        storage: storage(),
        revert_reasons: vec!["insufficient".into()],
        offchain: OffchainUnits::default(),
    }
}

fn wasm_artifact() -> WasmArtifact {
    WasmArtifact {
        contract: "Token".into(),
        module: vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00],
        exports: vec![
            ExportEntry { name: "total()".into(), function_index: 11 },
            ExportEntry { name: "balances(address)".into(), function_index: 12 },
        ],
        storage: storage(),
        revert_reasons: vec!["insufficient".into()],
        offchain: OffchainUnits::default(),
    }
}

fn range_system() -> ConstraintSystem {
    ConstraintSystem {
        name: "in_range".into(),
        variables: vec![
            Variable { index: 0, name: "x".into(), kind: SignalKind::Witness },
            Variable { index: 1, name: "lo".into(), kind: SignalKind::Input },
            Variable { index: 2, name: "ok".into(), kind: SignalKind::Output },
        ],
        constraints: vec![Constraint::Compare {
            lhs: Polynomial { terms: vec![Term { coefficient: 1, variables: vec![1] }] },
            op: Comparison::Le,
            rhs: Polynomial { terms: vec![Term { coefficient: 1, variables: vec![0] }] },
        }],
        public_inputs: vec![1],
        public_outputs: vec![2],
    }
}

// ============================================================================
// ARTIFACT TESTS
// ============================================================================

#[test]
fn test_artifact_accessors() {
    let artifact = Artifact::Evm(evm_artifact());
    assert_eq!(artifact.target(), Target::Evm);
    assert_eq!(artifact.contract(), "Token");
    assert_eq!(artifact.bytes(), &[0x5b, 0x00, 0x5b, 0x00]);
    assert_eq!(artifact.entry_names(), vec!["total()", "balances(address)"]);
    assert!(artifact.as_evm().is_some());
    assert!(artifact.as_wasm().is_none());
}

#[test]
fn test_both_shapes_share_entry_names_and_storage() {
    let evm = Artifact::Evm(evm_artifact());
    let wasm = Artifact::Wasm(wasm_artifact());
    assert_eq!(evm.entry_names(), wasm.entry_names());
    assert_eq!(evm.storage(), wasm.storage());
    assert_eq!(evm.revert_reasons(), wasm.revert_reasons());
}

#[test]
fn test_artifact_json_roundtrip() {
    let artifact = Artifact::Wasm(wasm_artifact());
    let json = artifact.to_json().expect("Failed to serialize artifact");
    assert!(json.contains("\"target\": \"wasm\""));

    let decoded = Artifact::from_json(&json).expect("Failed to deserialize artifact");
    assert_eq!(decoded, artifact);
}

#[test]
fn test_artifact_json_roundtrip_with_offchain_units() {
    let mut system = range_system();
    system.constraints.push(Constraint::Equal {
        polynomial: Polynomial {
            terms: vec![
                Term { coefficient: 36_893_488_147_419_103_232, variables: vec![0] },
                Term { coefficient: -1, variables: vec![1] },
            ],
        },
    });
    let descriptor = MpcDescriptor {
        name: "sum".into(),
        secret_inputs: vec![MpcInput { name: "a".into(), ty: "uint256".into(), is_array: false }],
        public_inputs: vec![],
        operations: vec![
            MpcOp::Arith {
                dst: 0,
                op: ArithOp::Mul,
                lhs: MpcOperand::Var("a".into()),
                rhs: MpcOperand::Const(U256::from(3)),
                secret: true,
            },
            MpcOp::Reveal { dst: 1, value: MpcOperand::Temp(0), point: 0 },
            MpcOp::Output { values: vec![MpcOperand::Temp(1)] },
        ],
        outputs: vec!["uint256".into()],
        reveal_sites: 1,
    };

    let mut evm = evm_artifact();
    evm.offchain = OffchainUnits { circuits: vec![system], mpc: vec![descriptor] };
    let artifact = Artifact::Evm(evm);

    let json = artifact.to_json().unwrap();
    assert_eq!(Artifact::from_json(&json).unwrap(), artifact);
}

#[test]
fn test_storage_entry_json_shape() {
    let json = serde_json::to_value(&storage()[1]).unwrap();
    assert_eq!(json, serde_json::json!({ "name": "balances", "slot": 1, "kind": "mapping", "depth": 1 }));
}

#[test]
fn test_validate_rejects_duplicate_entries() {
    let mut evm = evm_artifact();
    evm.selectors[1].signature = "total()".into();
    let err = Artifact::Evm(evm).validate().unwrap_err();
    assert!(err.to_string().contains("duplicate entry"));
}

#[test]
fn test_validate_rejects_offset_past_end() {
    let mut evm = evm_artifact();
    evm.selectors[1].offset = 4;
    assert!(matches!(Artifact::Evm(evm).validate(), Err(VeilError::InvalidArtifact(_))));
}

#[test]
fn test_validate_rejects_missing_wasm_header() {
    let mut wasm = wasm_artifact();
    wasm.module = vec![0x01, 0x02];
    assert!(Artifact::Wasm(wasm).validate().is_err());
}

// ============================================================================
// CONSTRAINT SYSTEM TESTS
// ============================================================================

#[test]
fn test_public_signals_inputs_then_outputs() {
    let system = range_system();
    let names: Vec<&str> = system.public_signals().iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["lo", "ok"]);
}

#[test]
fn test_unconstrained_witnesses() {
    let mut system = range_system();
    assert!(system.unconstrained_witnesses().is_empty());

    system.constraints.clear();
    let names: Vec<&str> = system.unconstrained_witnesses().iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["x"]);
}

#[test]
fn test_constraint_system_id_is_content_hash() {
    let system = range_system();
    assert_eq!(system.id().unwrap(), range_system().id().unwrap());

    let mut renamed = range_system();
    renamed.name = "other".into();
    assert_ne!(system.id().unwrap(), renamed.id().unwrap());
}

#[test]
fn test_predicate_variables() {
    let constraint = Constraint::Predicate {
        predicate: Predicate::Poseidon,
        args: vec![Operand::Variable(0), Operand::Constant(7)],
        result: Some(Operand::Variable(3)),
    };
    assert!(constraint.is_predicate());
    assert_eq!(constraint.variables().into_iter().collect::<Vec<_>>(), vec![0, 3]);
    assert!(Predicate::Poseidon.has_result());
    assert!(!Predicate::VerifySignature.has_result());
    assert_eq!(Predicate::from_name("pedersen"), Some(Predicate::Pedersen));
}

// ============================================================================
// MPC DESCRIPTOR TESTS
// ============================================================================

#[test]
fn test_mpc_descriptor_serialization() {
    let descriptor = MpcDescriptor {
        name: "tally".into(),
        secret_inputs: vec![MpcInput { name: "votes".into(), ty: "uint256".into(), is_array: true }],
        public_inputs: vec![],
        operations: vec![
            MpcOp::Reveal { dst: 0, value: MpcOperand::Var("sum".into()), point: 0 },
            MpcOp::Output { values: vec![MpcOperand::Temp(0)] },
        ],
        outputs: vec!["uint256".into()],
        reveal_sites: 1,
    };

    let json = descriptor.canonical_json().expect("Failed to serialize descriptor");
    assert!(json.contains("\"kind\":\"reveal\""));

    let decoded: MpcDescriptor = serde_json::from_str(&json).expect("Failed to deserialize descriptor");
    assert_eq!(decoded, descriptor);
    assert_eq!(decoded.id().unwrap(), descriptor.id().unwrap());
}

#[test]
fn test_const_operand_keeps_full_width() {
    let operand = MpcOperand::Const(U256::MAX);
    let json = serde_json::to_string(&operand).unwrap();
    let decoded: MpcOperand = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, operand);
}
