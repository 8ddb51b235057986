//! Veil Compiler
//!
//! Compiles Veil contracts, which mix ordinary functions with zero-knowledge
//! circuits and MPC functions, to EVM bytecode or a WASM module. Circuits and
//! MPC functions are compiled to off-chain units (constraint systems and MPC
//! descriptors) that travel with the artifact; on chain they only leave
//! verifier calls behind.

pub mod abi;
pub mod ast;
pub mod circuit;
pub mod codegen;
pub mod error;
pub mod layout;
pub mod lexer;
pub mod mpc;
pub mod options;
pub mod parser;
pub mod semantic;
pub mod token;

use tracing::{info, instrument};

pub use abi::{build_abi, ContractAbi};
pub use ast::ContractDecl;
pub use codegen::{validate_wasm, CodegenConfig, CodegenInput, EvmCodegen, WasmCodegen};
pub use error::{CodegenError, CompilerError, LexError, ParseError, Result, SemanticError};
pub use layout::{allocate, StorageLayout};
pub use lexer::tokenize;
pub use options::{CancelFlag, CompileOptions};
pub use semantic::{analyze, SemanticModel};
pub use token::{Position, Token, TokenKind};

// Re-export runtime types for convenience
pub use veil_runtime::{Artifact, EvmArtifact, Target, WasmArtifact};

/// Tokenizes and parses a contract
pub fn parse(source: &str) -> Result<ContractDecl> {
    let tokens = tokenize(source)?;
    Ok(parser::parse_tokens(&tokens)?)
}

/// Compiles a contract with the default options
pub fn compile(source: &str, target: Target) -> Result<Artifact> {
    compile_with(source, target, &CompileOptions::default())
}

#[instrument(level = "debug", skip_all, fields(%target))]
pub fn compile_with(source: &str, target: Target, options: &CompileOptions) -> Result<Artifact> {
    options.checkpoint()?;
    let tokens = tokenize(source)?;

    options.checkpoint()?;
    let mut contract = parser::parse_tokens(&tokens)?;

    options.checkpoint()?;
    let model = analyze(&contract, options)?;

    options.checkpoint()?;
    let layout = allocate(&mut contract);
    let abi = build_abi(&contract, &layout);

    options.checkpoint()?;
    let input = CodegenInput::new(&contract, &model, &layout, &abi);
    let artifact = match target {
        Target::Evm => Artifact::Evm(EvmCodegen::with_config(input, options.codegen.clone()).compile()?),
        Target::Wasm => Artifact::Wasm(WasmCodegen::with_config(input, options.codegen.clone()).compile()?),
    };

    info!(
        contract = %contract.name.name,
        bytes = artifact.bytes().len(),
        entries = abi.entries.len(),
        "compiled contract"
    );
    Ok(artifact)
}
