//! Compiler error types
//!
//! Lexing and parsing stop at the first error. The semantic pass collects
//! every violation of one unit before giving up; code generation is fatal on
//! the first construct it cannot lower.

use thiserror::Error;

use crate::token::Position;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Lexical error at {position}: unexpected character {found:?}")]
pub struct LexError {
    pub position: Position,
    pub found: char,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Parse error at {position}: expected {expected}, found {found}")]
    Unexpected { expected: String, found: String, position: Position },

    #[error("Parse error at {position}: duplicate modifier `{modifier}`")]
    DuplicateModifier { modifier: String, position: Position },

    #[error("Parse error at {position}: duplicate declaration of `{name}`")]
    DuplicateDeclaration { name: String, position: Position },

    #[error("Parse error at {position}: invalid literal `{literal}`: {reason}")]
    InvalidLiteral { literal: String, reason: String, position: Position },

    #[error("Parse error at {position}: nesting deeper than {limit} levels")]
    NestingTooDeep { limit: usize, position: Position },

    #[error("Parse error at {position}: `secret` types are only allowed in mpc function parameters and locals")]
    SecretOutsideMpc { position: Position },
}

impl ParseError {
    pub fn position(&self) -> Position {
        match self {
            Self::Unexpected { position, .. }
            | Self::DuplicateModifier { position, .. }
            | Self::DuplicateDeclaration { position, .. }
            | Self::InvalidLiteral { position, .. }
            | Self::NestingTooDeep { position, .. }
            | Self::SecretOutsideMpc { position } => *position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemanticError {
    #[error("{position}: private witness `{name}` is not referenced by any constraint")]
    UnconstrainedWitness { name: String, position: Position },

    #[error("{position}: `{name}` is not a declared witness or public input of this circuit")]
    UndeclaredPublicInput { name: String, position: Position },

    #[error("{position}: `{predicate}` called with {found} argument(s), expected {expected}")]
    BadPredicateArity { predicate: String, expected: String, found: usize, position: Position },

    #[error("{position}: unknown predicate `{name}`")]
    UnknownPredicate { name: String, position: Position },

    #[error("{position}: unsupported constraint: {reason}")]
    UnsupportedConstraint { reason: String, position: Position },

    #[error("{position}: secret value leaks: {detail}")]
    SecretLeak { detail: String, position: Position },

    #[error("{position}: {construct} is not allowed in an mpc function")]
    UnsupportedInMpc { construct: String, position: Position },

    #[error("{position}: unknown identifier `{name}`")]
    UnknownIdentifier { name: String, position: Position },

    #[error("{position}: unknown function `{name}`")]
    UnknownFunction { name: String, position: Position },

    #[error("{position}: unknown event `{name}`")]
    UnknownEvent { name: String, position: Position },

    #[error("{position}: unknown circuit `{name}`")]
    UnknownCircuit { name: String, position: Position },

    #[error("{position}: {what} expects {expected} value(s), found {found}")]
    ArityMismatch { what: String, expected: usize, found: usize, position: Position },

    #[error("{position}: `{name}` returns multiple values and cannot be used as an expression")]
    MultiValueCall { name: String, position: Position },

    #[error("{position}: mapping `{name}` must be indexed down to a value")]
    InvalidMappingAccess { name: String, position: Position },

    #[error("{position}: type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String, position: Position },

    #[error("{position}: invalid assignment target")]
    InvalidAssignmentTarget { position: Position },

    #[error("{position}: {mutability} function `{function}` cannot {action}")]
    MutabilityViolation { function: String, mutability: String, action: String, position: Position },

    #[error("{position}: `reveal` is only available inside mpc functions")]
    RevealOutsideMpc { position: Position },

    #[error("{position}: public signal `{signal}` of circuit `{circuit}` has no matching parameter")]
    UnboundPublicSignal { signal: String, circuit: String, position: Position },

    #[error("{position}: circuit-backed function `{function}` must declare exactly one `proof` parameter")]
    MissingProof { function: String, position: Position },
}

impl SemanticError {
    pub fn position(&self) -> Position {
        match self {
            Self::UnconstrainedWitness { position, .. }
            | Self::UndeclaredPublicInput { position, .. }
            | Self::BadPredicateArity { position, .. }
            | Self::UnknownPredicate { position, .. }
            | Self::UnsupportedConstraint { position, .. }
            | Self::SecretLeak { position, .. }
            | Self::UnsupportedInMpc { position, .. }
            | Self::UnknownIdentifier { position, .. }
            | Self::UnknownFunction { position, .. }
            | Self::UnknownEvent { position, .. }
            | Self::UnknownCircuit { position, .. }
            | Self::ArityMismatch { position, .. }
            | Self::MultiValueCall { position, .. }
            | Self::InvalidMappingAccess { position, .. }
            | Self::TypeMismatch { position, .. }
            | Self::InvalidAssignmentTarget { position }
            | Self::MutabilityViolation { position, .. }
            | Self::RevealOutsideMpc { position }
            | Self::UnboundPublicSignal { position, .. }
            | Self::MissingProof { position, .. } => *position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("Code generation error at {position}: unsupported construct: {construct}")]
    UnsupportedConstruct { construct: String, position: Position },

    #[error("Code generation produced an invalid module: {0}")]
    InvalidModule(String),
}

impl CodegenError {
    pub fn unsupported(construct: impl Into<String>, position: Position) -> Self {
        Self::UnsupportedConstruct { construct: construct.into(), position }
    }
}

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Semantic analysis of `{unit}` failed: {}", join_errors(.errors))]
    Semantic { unit: String, errors: Vec<SemanticError> },

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Runtime(#[from] veil_runtime::VeilError),

    #[error("Compilation cancelled")]
    Cancelled,
}

impl CompilerError {
    /// Semantic errors carried by this error, empty for other classes
    pub fn semantic_errors(&self) -> &[SemanticError] {
        match self {
            Self::Semantic { errors, .. } => errors,
            _ => &[],
        }
    }
}

fn join_errors(errors: &[SemanticError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

pub type Result<T> = std::result::Result<T, CompilerError>;
