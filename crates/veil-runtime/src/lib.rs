//! Veil Runtime
//!
//! Shared data model for the Veil toolchain. Deployers consume the compiled
//! [`Artifact`]s, provers consume the [`ConstraintSystem`]s and MPC parties
//! consume the [`MpcDescriptor`]s; none of them needs the compiler itself.

pub mod constraint;
pub mod error;
pub mod mpc;
pub mod types;

pub use constraint::{
    Comparison, Constraint, ConstraintSystem, Operand, Polynomial, Predicate, SignalKind, Term,
    Variable, Visibility,
};
pub use error::{Result, VeilError};
pub use mpc::{ArithOp, LogicOp, MpcDescriptor, MpcInput, MpcOp, MpcOperand};
pub use types::{
    Artifact, EvmArtifact, ExportEntry, OffchainUnits, SelectorEntry, StorageEntry, StorageKind,
    Target, WasmArtifact,
};
