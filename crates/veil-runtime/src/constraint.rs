//! Arithmetic constraint systems produced for `circuit` blocks
//!
//! A [`ConstraintSystem`] is the prover-facing description of one circuit:
//! the signal table in declaration order, the constraints over those signals
//! and the ordered public input/output lists that the on-chain verifier call
//! must reproduce exactly.

use alloy_primitives::{keccak256, B256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Public,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// `private witness x;`
    Witness,
    /// `public input y;`
    Input,
    /// `public output z;`
    Output,
}

impl SignalKind {
    pub fn visibility(self) -> Visibility {
        match self {
            Self::Witness => Visibility::Private,
            Self::Input | Self::Output => Visibility::Public,
        }
    }
}

/// A circuit signal with its stable index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Variable {
    pub index: usize,
    pub name: String,
    pub kind: SignalKind,
}

impl Variable {
    pub fn visibility(&self) -> Visibility {
        self.kind.visibility()
    }
}

/// `coefficient * v[0] * v[1] ...`, with at most two variables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Term {
    #[serde(with = "decimal")]
    pub coefficient: i128,
    pub variables: Vec<usize>,
}

impl Term {
    pub fn degree(&self) -> usize {
        self.variables.len()
    }
}

/// Sum of terms, kept sorted by variable list with no zero coefficients
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Polynomial {
    pub terms: Vec<Term>,
}

impl Polynomial {
    pub fn degree(&self) -> usize {
        self.terms.iter().map(Term::degree).max().unwrap_or(0)
    }

    pub fn variables(&self) -> BTreeSet<usize> {
        self.terms.iter().flat_map(|t| t.variables.iter().copied()).collect()
    }

    pub fn is_constant(&self) -> bool {
        self.terms.iter().all(|t| t.variables.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Variable(usize),
    Constant(#[serde(with = "decimal")] i128),
}

impl Operand {
    pub fn variable(&self) -> Option<usize> {
        match self {
            Self::Variable(index) => Some(*index),
            Self::Constant(_) => None,
        }
    }
}

/// Named hash and signature predicates with fixed signatures
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// `r == poseidon([x1, ..., xn])`, 1 <= n <= 16
    Poseidon,
    /// `r == pedersen(value, randomness)`
    Pedersen,
    /// `verify_signature(public_key, message, signature)`
    VerifySignature,
}

impl Predicate {
    pub const POSEIDON_MAX_WIDTH: usize = 16;

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "poseidon" => Some(Self::Poseidon),
            "pedersen" => Some(Self::Pedersen),
            "verify_signature" => Some(Self::VerifySignature),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Poseidon => "poseidon",
            Self::Pedersen => "pedersen",
            Self::VerifySignature => "verify_signature",
        }
    }

    /// Hash predicates produce a value and must be compared against a result
    pub fn has_result(self) -> bool {
        !matches!(self, Self::VerifySignature)
    }

    /// Human readable form of the fixed argument signature
    pub fn signature(self) -> &'static str {
        match self {
            Self::Poseidon => "poseidon([x1, ..., xn]) with 1 <= n <= 16",
            Self::Pedersen => "pedersen(value, randomness)",
            Self::VerifySignature => "verify_signature(public_key, message, signature)",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// `polynomial == 0`
    Equal { polynomial: Polynomial },
    /// `polynomial != 0`
    NotEqual { polynomial: Polynomial },
    /// `lhs < rhs` or `lhs <= rhs`
    Compare { lhs: Polynomial, op: Comparison, rhs: Polynomial },
    /// `lower (op) value (op) upper`
    Range {
        lower: Polynomial,
        lower_op: Comparison,
        value: Polynomial,
        upper_op: Comparison,
        upper: Polynomial,
    },
    Predicate { predicate: Predicate, args: Vec<Operand>, result: Option<Operand> },
}

impl Constraint {
    /// Every signal index mentioned by this constraint
    pub fn variables(&self) -> BTreeSet<usize> {
        match self {
            Self::Equal { polynomial } | Self::NotEqual { polynomial } => polynomial.variables(),
            Self::Compare { lhs, rhs, .. } => {
                lhs.variables().into_iter().chain(rhs.variables()).collect()
            }
            Self::Range { lower, value, upper, .. } => lower
                .variables()
                .into_iter()
                .chain(value.variables())
                .chain(upper.variables())
                .collect(),
            Self::Predicate { args, result, .. } => {
                args.iter().chain(result.iter()).filter_map(Operand::variable).collect()
            }
        }
    }

    pub fn is_predicate(&self) -> bool {
        matches!(self, Self::Predicate { .. })
    }
}

/// Constraint system for one circuit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintSystem {
    pub name: String,
    /// All signals, indexed in declaration order
    pub variables: Vec<Variable>,
    pub constraints: Vec<Constraint>,
    /// Indices of `public input` signals in declaration order
    pub public_inputs: Vec<usize>,
    /// Indices of `public output` signals in declaration order
    pub public_outputs: Vec<usize>,
}

impl ConstraintSystem {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn witnesses(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(|v| v.kind == SignalKind::Witness)
    }

    /// Public signals in the order the verifier expects them: inputs then outputs
    pub fn public_signals(&self) -> Vec<&Variable> {
        self.public_inputs
            .iter()
            .chain(&self.public_outputs)
            .filter_map(|&index| self.variables.get(index))
            .collect()
    }

    pub fn referenced_variables(&self) -> BTreeSet<usize> {
        self.constraints.iter().flat_map(Constraint::variables).collect()
    }

    /// Private witnesses that no constraint mentions
    pub fn unconstrained_witnesses(&self) -> Vec<&Variable> {
        let referenced = self.referenced_variables();
        self.witnesses().filter(|w| !referenced.contains(&w.index)).collect()
    }

    /// Canonical JSON encoding, the preimage of [`ConstraintSystem::id`]
    pub fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Identifier the verifier uses to select the verification key
    pub fn id(&self) -> Result<B256> {
        Ok(keccak256(self.canonical_json()?.as_bytes()))
    }
}

/// Coefficients travel as decimal strings. Tagged enums buffer their fields
/// through serde's generic content type, which has no 128-bit integers.
mod decimal {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(|_| D::Error::custom(format!("invalid coefficient `{text}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(index: usize, name: &str, kind: SignalKind) -> Variable {
        Variable { index, name: name.to_string(), kind }
    }

    fn sample() -> ConstraintSystem {
        ConstraintSystem {
            name: "Ownership".to_string(),
            variables: vec![
                var(0, "secret", SignalKind::Witness),
                var(1, "commitment", SignalKind::Input),
                var(2, "unused", SignalKind::Witness),
            ],
            constraints: vec![Constraint::Predicate {
                predicate: Predicate::Poseidon,
                args: vec![Operand::Variable(0)],
                result: Some(Operand::Variable(1)),
            }],
            public_inputs: vec![1],
            public_outputs: vec![],
        }
    }

    #[test]
    fn test_unconstrained_witnesses() {
        let cs = sample();
        let missing: Vec<_> = cs.unconstrained_witnesses().iter().map(|v| v.name.clone()).collect();
        assert_eq!(missing, vec!["unused".to_string()]);
    }

    #[test]
    fn test_predicate_variables_include_result() {
        let cs = sample();
        let vars = cs.constraints[0].variables();
        assert!(vars.contains(&0));
        assert!(vars.contains(&1));
    }

    #[test]
    fn test_id_is_stable() {
        let cs = sample();
        assert_eq!(cs.id().unwrap(), cs.clone().id().unwrap());

        let mut other = sample();
        other.name = "Other".to_string();
        assert_ne!(cs.id().unwrap(), other.id().unwrap());
    }

    #[test]
    fn test_wide_coefficients_roundtrip() {
        let mut cs = sample();
        cs.constraints.push(Constraint::Equal {
            polynomial: Polynomial {
                terms: vec![
                    Term { coefficient: 1 << 65, variables: vec![0] },
                    Term { coefficient: i128::MIN + 1, variables: vec![1] },
                ],
            },
        });
        cs.constraints.push(Constraint::Predicate {
            predicate: Predicate::Pedersen,
            args: vec![Operand::Variable(0), Operand::Constant(i128::MAX)],
            result: Some(Operand::Variable(1)),
        });

        let json = cs.canonical_json().unwrap();
        assert!(json.contains("\"36893488147419103232\""));
        let decoded: ConstraintSystem = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, cs);
    }

    #[test]
    fn test_coefficient_rejects_non_decimal() {
        let json = r#"{"coefficient":"0xff","variables":[]}"#;
        assert!(serde_json::from_str::<Term>(json).is_err());
    }

    #[test]
    fn test_predicate_names() {
        for predicate in [Predicate::Poseidon, Predicate::Pedersen, Predicate::VerifySignature] {
            assert_eq!(Predicate::from_name(predicate.name()), Some(predicate));
        }
        assert_eq!(Predicate::from_name("sha256"), None);
    }

    #[test]
    fn test_signal_visibility() {
        assert_eq!(SignalKind::Witness.visibility(), Visibility::Private);
        assert_eq!(SignalKind::Input.visibility(), Visibility::Public);
        assert_eq!(SignalKind::Output.visibility(), Visibility::Public);
    }
}
