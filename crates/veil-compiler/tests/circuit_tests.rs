//! Tests for circuit lowering and circuit-backed functions

use veil_compiler::{compile, CompilerError, SemanticError, Target};
use veil_runtime::{Artifact, Comparison, Constraint, ConstraintSystem, Operand, Predicate, SignalKind};

fn circuits(source: &str) -> Vec<ConstraintSystem> {
    compile(source, Target::Evm).unwrap().offchain().circuits.clone()
}

fn semantic_errors(source: &str) -> Vec<SemanticError> {
    match compile(source, Target::Evm) {
        Err(err @ CompilerError::Semantic { .. }) => err.semantic_errors().to_vec(),
        other => panic!("expected semantic errors, got {other:?}"),
    }
}

// ============================================================================
// CONSTRAINT SYSTEM TESTS
// ============================================================================

#[test]
fn test_poseidon_commitment() {
    let systems = circuits(
        "contract Vault {
            circuit Commit {
                private witness a;
                private witness nonce;
                public input commitment;
                constraint commitment == poseidon([a, nonce]);
            }
        }",
    );
    let system = &systems[0];
    assert_eq!(system.name, "Commit");
    assert_eq!(system.constraints.len(), 1);

    let a = system.variable("a").unwrap().index;
    let commitment = system.variable("commitment").unwrap().index;
    let Constraint::Predicate { predicate, args, result } = &system.constraints[0] else {
        panic!("expected predicate constraint");
    };
    assert_eq!(*predicate, Predicate::Poseidon);
    assert!(args.contains(&Operand::Variable(a)));
    assert_eq!(*result, Some(Operand::Variable(commitment)));
    assert!(system.constraints[0].variables().contains(&a));
    assert!(system.constraints[0].variables().contains(&commitment));
}

#[test]
fn test_predicate_either_orientation() {
    let systems = circuits(
        "contract C {
            circuit P {
                private witness v;
                private witness r;
                public output c;
                constraint pedersen(v, r) == c;
            }
        }",
    );
    assert!(matches!(
        systems[0].constraints[0],
        Constraint::Predicate { predicate: Predicate::Pedersen, result: Some(_), .. }
    ));
}

#[test]
fn test_signals_keep_declaration_order() {
    let systems = circuits(
        "contract C {
            circuit Order {
                public input total;
                private witness x;
                public output doubled;
                private witness y;
                constraint x + y == total;
                constraint doubled == 2 * total;
            }
        }",
    );
    let system = &systems[0];
    let kinds: Vec<SignalKind> = system.variables.iter().map(|v| v.kind).collect();
    assert_eq!(
        kinds,
        vec![SignalKind::Input, SignalKind::Witness, SignalKind::Output, SignalKind::Witness]
    );
    assert_eq!(system.public_inputs, vec![0]);
    assert_eq!(system.public_outputs, vec![2]);
}

#[test]
fn test_comparisons_normalize_to_less_than() {
    let systems = circuits(
        "contract C { circuit Cmp { private witness x; public input y; constraint x > y; } }",
    );
    let Constraint::Compare { op, lhs, rhs } = &systems[0].constraints[0] else {
        panic!("expected comparison");
    };
    assert_eq!(*op, Comparison::Lt);
    // x > y becomes y < x
    assert_eq!(lhs.variables().into_iter().collect::<Vec<_>>(), vec![1]);
    assert_eq!(rhs.variables().into_iter().collect::<Vec<_>>(), vec![0]);
}

#[test]
fn test_circuit_ids_are_stable() {
    let source = "contract C { circuit Sq { private witness x; public input y; constraint x * x == y; } }";
    let first = circuits(source);
    let second = circuits(source);
    assert_eq!(first[0].id().unwrap(), second[0].id().unwrap());
}

#[test]
fn test_wide_coefficients_survive_artifact_json() {
    let source = "contract C {
        circuit Wide { private witness a; public input b; constraint 36893488147419103232 * a == b; }
    }";
    for target in [Target::Evm, Target::Wasm] {
        let artifact = compile(source, target).unwrap();
        let json = artifact.to_json().unwrap();
        assert!(json.contains("\"36893488147419103232\""), "{json}");
        assert_eq!(Artifact::from_json(&json).unwrap(), artifact);
    }
}

// ============================================================================
// CIRCUIT ERROR TESTS
// ============================================================================

#[test]
fn test_unconstrained_witness_fails() {
    let errors = semantic_errors(
        "contract C {
            circuit Loose {
                private witness x;
                private witness used;
                public input y;
                constraint used == y;
            }
        }",
    );
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], SemanticError::UnconstrainedWitness { name, .. } if name == "x"));
}

#[test]
fn test_undeclared_signal() {
    let errors = semantic_errors(
        "contract C { circuit U { private witness x; constraint x == ghost; } }",
    );
    assert!(errors
        .iter()
        .any(|e| matches!(e, SemanticError::UndeclaredPublicInput { name, .. } if name == "ghost")));
}

#[test]
fn test_predicate_arity() {
    let errors = semantic_errors(
        "contract C { circuit A { private witness v; public input c; constraint c == pedersen(v); } }",
    );
    assert!(matches!(errors[0], SemanticError::BadPredicateArity { found: 1, .. }));
}

#[test]
fn test_poseidon_width_limit() {
    let inputs: Vec<String> = (0..17).map(|i| format!("w{i}")).collect();
    let witnesses: String = inputs.iter().map(|w| format!("private witness {w}; ")).collect();
    let source = format!(
        "contract C {{ circuit Wide {{ {witnesses} public input h; constraint h == poseidon([{}]); }} }}",
        inputs.join(", ")
    );
    let errors = semantic_errors(&source);
    assert!(errors.iter().any(|e| matches!(e, SemanticError::BadPredicateArity { found: 17, .. })));
}

#[test]
fn test_unknown_predicate() {
    let errors = semantic_errors(
        "contract C { circuit H { private witness v; public input h; constraint h == sha256(v); } }",
    );
    assert!(errors.iter().any(|e| matches!(e, SemanticError::UnknownPredicate { .. })));
}

#[test]
fn test_division_is_unsupported() {
    let errors = semantic_errors(
        "contract C { circuit D { private witness v; public input h; constraint v / 2 == h; } }",
    );
    assert!(matches!(errors[0], SemanticError::UnsupportedConstraint { .. }));
}

// ============================================================================
// CIRCUIT-BACKED FUNCTION TESTS
// ============================================================================

const SQUARE: &str = "contract Square {
    circuit IsSquare { private witness root; public input value; constraint root * root == value; }
    function claim(uint256 value, proof p) public circuit IsSquare returns (bool) { return true; }
}";

#[test]
fn test_circuit_backed_function_compiles_for_both_targets() {
    for target in [Target::Evm, Target::Wasm] {
        let artifact = compile(SQUARE, target).unwrap();
        assert_eq!(artifact.entry_names(), vec!["claim(uint256,bytes32)"]);
        assert_eq!(artifact.offchain().circuits.len(), 1);
    }
}

#[test]
fn test_unbound_public_signal() {
    let errors = semantic_errors(
        "contract C {
            circuit Z { private witness r; public input value; constraint r * r == value; }
            function claim(uint256 other, proof p) public circuit Z { }
        }",
    );
    assert!(matches!(&errors[0], SemanticError::UnboundPublicSignal { signal, .. } if signal == "value"));
}

#[test]
fn test_missing_proof() {
    let errors = semantic_errors(
        "contract C {
            circuit Z { private witness r; public input value; constraint r * r == value; }
            function claim(uint256 value) public circuit Z { }
        }",
    );
    assert!(errors.iter().any(|e| matches!(e, SemanticError::MissingProof { .. })));
}

#[test]
fn test_unknown_circuit() {
    let errors = semantic_errors("contract C { function f(proof p) public circuit Nope { } }");
    assert!(errors.iter().any(|e| matches!(e, SemanticError::UnknownCircuit { .. })));
}
