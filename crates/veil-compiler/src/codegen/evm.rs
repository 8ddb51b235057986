//! EVM bytecode generation
//!
//! Runtime layout: selector dispatch, one entry wrapper per ABI entry, then
//! one body per function. Wrappers decode calldata onto the stack and call
//! the body through the same convention internal calls use:
//!
//! - caller pushes a return label, then the arguments, then jumps
//! - the body opens a memory frame at the allocation pointer, saves the old
//!   frame pointer in the frame's first word and spills its parameters into
//!   the following words
//! - `return` writes its values to the return buffer and jumps to the
//!   epilogue, which releases the frame and jumps back
//!
//! Memory: `0x00..0x40` hashing scratch, `0x40` allocation pointer, `0x60`
//! frame pointer, `0x80..0x180` return buffer, frames from `0x180`.

use std::collections::HashMap;

use alloy_primitives::{Address, B256, U256};
use tracing::{debug, instrument, warn};
use veil_runtime::{EvmArtifact, SelectorEntry};

use super::assembler::{emit_push_fixed_width, opcodes::*, Assembler, Label};
use super::{count_locals, CodegenConfig, CodegenInput, Locals};
use crate::abi::{self, AbiEntry, EntryKind, REVERT_BARE, REVERT_PROOF_FAILED};
use crate::ast::*;
use crate::error::{CodegenError, Result};
use crate::token::Position;

const SCRATCH_HIGH: u64 = 0x20;
const ALLOC_PTR: u64 = 0x40;
const FRAME_PTR: u64 = 0x60;
const RETURN_BUFFER: u64 = 0x80;
const MAX_RETURN_WORDS: usize = 8;
const FRAME_BASE: u64 = 0x180;
const WORD: u64 = 32;

/// Byte length of the deployment prefix emitted by [`deploy_code`]
const INIT_CODE_LEN: usize = 11;

type GenResult<T> = std::result::Result<T, CodegenError>;

#[derive(Debug, Clone)]
pub struct EvmCodegen<'a> {
    input: CodegenInput<'a>,
    config: CodegenConfig,
}

impl<'a> EvmCodegen<'a> {
    pub fn new(input: CodegenInput<'a>) -> Self {
        Self { input, config: CodegenConfig::default() }
    }

    pub fn with_config(input: CodegenInput<'a>, config: CodegenConfig) -> Self {
        Self { input, config }
    }

    pub fn config(&self) -> &CodegenConfig {
        &self.config
    }

    #[instrument(level = "debug", skip_all, fields(contract = %self.input.contract.name.name))]
    pub fn compile(&self) -> Result<EvmArtifact> {
        let mut ids = HashMap::new();
        for system in &self.input.model.circuits {
            ids.insert(system.name.clone(), system.id()?);
        }
        for descriptor in &self.input.model.mpc {
            ids.insert(descriptor.name.clone(), descriptor.id()?);
        }

        let mut emitter = Emitter::new(self.input, &self.config, ids);
        let entry_labels = emitter.dispatcher();
        for (entry, label) in self.input.abi.entries.iter().zip(&entry_labels) {
            emitter.entry(entry, *label)?;
        }
        for function in self.input.contract.functions() {
            emitter.function_body(function)?;
        }

        let code = emitter.asm.assemble()?;
        let selectors = self
            .input
            .abi
            .entries
            .iter()
            .zip(&entry_labels)
            .map(|(entry, label)| {
                let offset = code.label_offsets.get(label).copied().ok_or_else(|| {
                    CodegenError::InvalidModule(format!("entry `{}` was not placed", entry.signature))
                })?;
                Ok(SelectorEntry { signature: entry.signature.clone(), selector: entry.selector, offset })
            })
            .collect::<GenResult<Vec<_>>>()?;

        let bytecode = code.bytecode;
        if bytecode.len() > self.config.max_code_size {
            warn!(
                size = bytecode.len(),
                limit = self.config.max_code_size,
                "runtime bytecode exceeds the deployable size limit"
            );
        }
        debug!(bytes = bytecode.len(), selectors = selectors.len(), "generated evm bytecode");

        Ok(EvmArtifact {
            contract: self.input.contract.name.name.clone(),
            deploy_bytecode: deploy_code(&bytecode),
            bytecode,
            selectors,
            storage: self.input.layout.entries.clone(),
            revert_reasons: self.input.abi.revert_reasons.clone(),
            offchain: self.input.offchain(),
        })
    }
}

/// Init code that copies the runtime code into memory and returns it
pub fn deploy_code(runtime: &[u8]) -> Vec<u8> {
    let mut code = Vec::with_capacity(INIT_CODE_LEN + runtime.len());
    emit_push_fixed_width(&mut code, U256::from(runtime.len()), 2);
    code.push(DUP1);
    emit_push_fixed_width(&mut code, U256::from(INIT_CODE_LEN), 2);
    code.extend_from_slice(&[PUSH0, CODECOPY, PUSH0, RETURN]);
    code.extend_from_slice(runtime);
    code
}

/// Per-body state
struct Frame {
    locals: Locals,
    epilogue: Label,
}

struct Emitter<'a, 'c> {
    input: CodegenInput<'a>,
    config: &'c CodegenConfig,
    ids: HashMap<String, B256>,
    asm: Assembler,
    bodies: HashMap<&'a str, Label>,
    bare_revert: Label,
}

impl<'a, 'c> Emitter<'a, 'c> {
    fn new(input: CodegenInput<'a>, config: &'c CodegenConfig, ids: HashMap<String, B256>) -> Self {
        let mut asm = Assembler::new();
        let bodies = input.contract.functions().map(|f| (f.name.name.as_str(), asm.new_label())).collect();
        let bare_revert = asm.new_label();
        Self { input, config, ids, asm, bodies, bare_revert }
    }

    /// Emits the selector switch and returns one label per ABI entry
    fn dispatcher(&mut self) -> Vec<Label> {
        self.asm.emit_push_u64(FRAME_BASE);
        self.store_to(ALLOC_PTR);

        self.asm.emit_push_u64(4);
        self.asm.emit_ops(&[CALLDATASIZE, LT]);
        self.asm.jump_if(self.bare_revert);

        self.asm.emit_ops(&[PUSH0, CALLDATALOAD]);
        self.asm.emit_push_u64(0xe0);
        self.asm.emit_op(SHR);

        let abi = self.input.abi;
        let entries = &abi.entries;
        let mut labels = Vec::with_capacity(entries.len());
        for entry in entries {
            let label = self.asm.new_label();
            self.asm.emit_op(DUP1);
            self.asm.emit_push_u64(u64::from(u32::from_be_bytes(entry.selector)));
            self.asm.emit_op(EQ);
            self.asm.jump_if(label);
            labels.push(label);
        }

        self.asm.jump_target(self.bare_revert);
        self.revert_with(REVERT_BARE);
        labels
    }

    fn entry(&mut self, entry: &AbiEntry, label: Label) -> GenResult<()> {
        self.asm.jump_target(label);
        self.asm.emit_op(POP);

        match &entry.kind {
            EntryKind::Getter { slot, keys, .. } => {
                if let Some(output) = entry.outputs.iter().find(|o| o.ends_with("[]")) {
                    return Err(CodegenError::unsupported(
                        format!("getter `{}` of type {output}", entry.name),
                        Position::default(),
                    ));
                }
                self.require_calldata(*keys);
                self.asm.emit_push_u64(*slot);
                for i in 0..*keys {
                    self.load_argument(i);
                    self.hash_slot();
                }
                self.asm.emit_op(SLOAD);
                self.asm.emit_push_u64(RETURN_BUFFER);
                self.asm.emit_op(MSTORE);
                self.return_words(1);
            }
            EntryKind::Function => {
                let contract = self.input.contract;
                let function = contract.function(&entry.name).ok_or_else(|| {
                    CodegenError::InvalidModule(format!("no function behind entry `{}`", entry.signature))
                })?;
                self.check_external_types(&function.params, &function.returns, function.position)?;
                self.require_calldata(function.params.len());

                let back = self.asm.new_label();
                self.asm.emit_push_label(back);
                for i in 0..function.params.len() {
                    self.load_argument(i);
                }
                let body = self.body(&function.name.name)?;
                self.asm.jump(body);
                self.asm.jump_target(back);
                self.return_words(function.returns.len());
            }
            EntryKind::MpcStub => self.mpc_stub(entry)?,
        }
        Ok(())
    }

    /// Accepts off-chain MPC outputs once the MPC verifier approves them
    fn mpc_stub(&mut self, entry: &AbiEntry) -> GenResult<()> {
        let contract = self.input.contract;
        let function = contract.mpc_functions().find(|f| f.name.name == entry.name).ok_or_else(|| {
            CodegenError::InvalidModule(format!("no mpc function behind entry `{}`", entry.signature))
        })?;
        self.check_external_types(&function.plain_params, &function.returns, function.position)?;

        let plain = function.plain_params.len() as u64;
        let values = plain + function.returns.len() as u64;
        self.require_calldata(values as usize + 1);

        let id = self.unit_id(&entry.name, function.position)?;
        let signature = format!("verifyMpc(bytes32,bytes32,uint256[{values}])");
        self.call_header(&signature, id);
        // proof follows the values in calldata
        self.asm.emit_push_u64(4 + WORD * values);
        self.asm.emit_op(CALLDATALOAD);
        self.store_free(36);

        self.asm.emit_push_u64(WORD * values);
        self.asm.emit_push_u64(4);
        self.free_pointer(68);
        self.asm.emit_op(CALLDATACOPY);
        self.call_verifier(self.config.mpc_verifier_address, 68 + WORD * values);

        // echo the accepted outputs
        let outputs = function.returns.len();
        self.asm.emit_push_u64(WORD * outputs as u64);
        self.asm.emit_push_u64(4 + WORD * plain);
        self.asm.emit_push_u64(RETURN_BUFFER);
        self.asm.emit_op(CALLDATACOPY);
        self.return_words(outputs);
        Ok(())
    }

    fn function_body(&mut self, function: &'a FunctionDecl) -> GenResult<()> {
        if function.returns.len() > MAX_RETURN_WORDS {
            return Err(CodegenError::unsupported(
                format!("more than {MAX_RETURN_WORDS} return values"),
                function.position,
            ));
        }
        if let Some(param) = function.params.iter().find(|p| !p.ty.is_word()) {
            return Err(CodegenError::unsupported(
                format!("array parameter `{}`", param.name.name),
                param.name.position,
            ));
        }

        let label = self.body(&function.name.name)?;
        self.asm.jump_target(label);

        let params = function.params.len() as u32;
        let slots = 1 + u64::from(params + count_locals(&function.body));
        self.prologue(slots * WORD);

        let mut frame = Frame {
            locals: Locals::new(function.params.iter().map(|p| p.name.name.as_str())),
            epilogue: self.asm.new_label(),
        };
        for i in (0..params).rev() {
            self.store_local(i);
        }

        if let Some(circuit) = &function.circuit {
            self.verify_proof(&frame, function, circuit)?;
        }

        self.block(&mut frame, &function.body)?;

        // falling off the end returns zeroes
        for i in 0..function.returns.len() as u64 {
            self.asm.emit_op(PUSH0);
            self.asm.emit_push_u64(RETURN_BUFFER + WORD * i);
            self.asm.emit_op(MSTORE);
        }
        self.asm.jump_target(frame.epilogue);
        self.epilogue();
        Ok(())
    }

    /// Stack: `[ret, args...]` -> `[ret, args...]` with a fresh frame of `size` bytes
    fn prologue(&mut self, size: u64) {
        self.load_from(ALLOC_PTR);
        self.load_from(FRAME_PTR);
        self.asm.emit_ops(&[DUP2, MSTORE, DUP1]);
        self.store_to(FRAME_PTR);
        self.asm.emit_push_u64(size);
        self.asm.emit_op(ADD);
        self.store_to(ALLOC_PTR);
    }

    /// Releases the frame and jumps to the return label left on the stack
    fn epilogue(&mut self) {
        self.load_from(FRAME_PTR);
        self.store_to(ALLOC_PTR);
        self.load_from(FRAME_PTR);
        self.asm.emit_op(MLOAD);
        self.store_to(FRAME_PTR);
        self.asm.emit_op(JUMP);
    }

    /// Calls the proof verifier with the circuit's public signals in order
    fn verify_proof(&mut self, frame: &Frame, function: &FunctionDecl, circuit: &Ident) -> GenResult<()> {
        let system = self
            .input
            .model
            .circuit(&circuit.name)
            .ok_or_else(|| CodegenError::unsupported(format!("circuit `{}`", circuit.name), circuit.position))?;
        let proof = function
            .params
            .iter()
            .find(|p| p.ty == TypeName::Proof)
            .and_then(|p| frame.locals.lookup(&p.name.name))
            .ok_or_else(|| CodegenError::unsupported("circuit-backed function without proof", function.position))?;
        let signals = system
            .public_signals()
            .iter()
            .map(|signal| {
                frame.locals.lookup(&signal.name).ok_or_else(|| {
                    CodegenError::unsupported(format!("unbound signal `{}`", signal.name), circuit.position)
                })
            })
            .collect::<GenResult<Vec<_>>>()?;

        let id = self.unit_id(&circuit.name, circuit.position)?;
        let signature = format!("verifyProof(bytes32,bytes32,uint256[{}])", signals.len());
        self.call_header(&signature, id);
        self.load_local(proof);
        self.store_free(36);
        for (i, local) in signals.into_iter().enumerate() {
            self.load_local(local);
            self.store_free(68 + WORD * i as u64);
        }
        self.call_verifier(self.config.verifier_address, 68 + WORD * system.public_signals().len() as u64);
        Ok(())
    }

    fn unit_id(&self, name: &str, position: Position) -> GenResult<B256> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::unsupported(format!("off-chain unit `{name}`"), position))
    }

    /// Writes selector and unit id at the start of free memory
    fn call_header(&mut self, signature: &str, id: B256) {
        let selector = u32::from_be_bytes(abi::selector(signature));
        self.asm.emit_push(U256::from(selector) << 224usize);
        self.store_free(0);
        self.asm.emit_push(U256::from_be_bytes(id.0));
        self.store_free(4);
    }

    /// Calls `address` with `size` bytes of calldata at free memory and reverts
    /// with [`REVERT_PROOF_FAILED`] unless it succeeds and returns `1`
    fn call_verifier(&mut self, address: Address, size: u64) {
        self.asm.emit_ops(&[PUSH0, PUSH0, MSTORE]);
        self.asm.emit_push_u64(SCRATCH_HIGH);
        self.asm.emit_op(PUSH0);
        self.asm.emit_push_u64(size);
        self.free_pointer(0);
        self.asm.emit_op(PUSH0);
        self.asm.emit_push(U256::from_be_slice(address.as_slice()));
        self.asm.emit_ops(&[GAS, CALL, PUSH0, MLOAD]);
        self.asm.emit_push_u64(1);
        self.asm.emit_ops(&[EQ, AND]);

        let ok = self.asm.new_label();
        self.asm.jump_if(ok);
        self.revert_with(REVERT_PROOF_FAILED);
        self.asm.jump_target(ok);
    }

    fn block(&mut self, frame: &mut Frame, block: &[Stmt]) -> GenResult<()> {
        frame.locals.push();
        for stmt in block {
            self.stmt(frame, stmt)?;
        }
        frame.locals.pop();
        Ok(())
    }

    fn stmt(&mut self, frame: &mut Frame, stmt: &Stmt) -> GenResult<()> {
        match &stmt.kind {
            StmtKind::Require { condition, message } => {
                let ok = self.asm.new_label();
                self.expr(frame, condition)?;
                self.asm.jump_if(ok);
                let code = self.input.abi.revert_code(message.as_deref());
                self.revert_with(code);
                self.asm.jump_target(ok);
            }
            StmtKind::Assign { target, value } => self.assign(frame, target, value)?,
            StmtKind::VarDecl { ty, name, value } => {
                if !ty.is_word() {
                    return Err(CodegenError::unsupported(
                        format!("local `{}` of type {}", name.name, ty.canonical()),
                        stmt.position,
                    ));
                }
                match value {
                    Some(value) => self.expr(frame, value)?,
                    None => self.asm.emit_op(PUSH0),
                }
                let index = frame.locals.declare(&name.name);
                self.store_local(index);
            }
            StmtKind::If { condition, then_block, else_block } => {
                let otherwise = self.asm.new_label();
                let end = self.asm.new_label();
                self.expr(frame, condition)?;
                self.asm.emit_op(ISZERO);
                self.asm.jump_if(otherwise);
                self.block(frame, then_block)?;
                self.asm.jump(end);
                self.asm.jump_target(otherwise);
                if let Some(else_block) = else_block {
                    self.block(frame, else_block)?;
                }
                self.asm.jump_target(end);
            }
            StmtKind::For { init, condition, step, body } => {
                let start = self.asm.new_label();
                let end = self.asm.new_label();
                frame.locals.push();
                if let Some(init) = init {
                    self.stmt(frame, init)?;
                }
                self.asm.jump_target(start);
                if let Some(condition) = condition {
                    self.expr(frame, condition)?;
                    self.asm.emit_op(ISZERO);
                    self.asm.jump_if(end);
                }
                self.block(frame, body)?;
                if let Some(step) = step {
                    self.stmt(frame, step)?;
                }
                self.asm.jump(start);
                self.asm.jump_target(end);
                frame.locals.pop();
            }
            StmtKind::Return(values) => {
                if values.len() > MAX_RETURN_WORDS {
                    return Err(CodegenError::unsupported(
                        format!("more than {MAX_RETURN_WORDS} return values"),
                        stmt.position,
                    ));
                }
                // all values are evaluated before any is written, calls inside
                // them reuse the buffer
                for value in values {
                    self.expr(frame, value)?;
                }
                for i in (0..values.len() as u64).rev() {
                    self.asm.emit_push_u64(RETURN_BUFFER + WORD * i);
                    self.asm.emit_op(MSTORE);
                }
                self.asm.jump(frame.epilogue);
            }
            StmtKind::Emit { event, args } => {
                let topic = self
                    .input
                    .abi
                    .event(&event.name)
                    .map(|e| e.topic)
                    .ok_or_else(|| CodegenError::unsupported(format!("event `{}`", event.name), event.position))?;
                for arg in args {
                    self.expr(frame, arg)?;
                }
                for i in (0..args.len() as u64).rev() {
                    self.store_free(WORD * i);
                }
                self.asm.emit_push(U256::from_be_bytes(topic.0));
                self.asm.emit_push_u64(WORD * args.len() as u64);
                self.free_pointer(0);
                self.asm.emit_op(LOG1);
            }
            StmtKind::Expr(expr) => {
                let pushed = match &expr.kind {
                    ExprKind::Call { callee, args } => self.call(frame, callee, args, false)?,
                    _ => {
                        self.expr(frame, expr)?;
                        true
                    }
                };
                if pushed {
                    self.asm.emit_op(POP);
                }
            }
        }
        Ok(())
    }

    fn assign(&mut self, frame: &mut Frame, target: &Expr, value: &Expr) -> GenResult<()> {
        if let Some(name) = target.as_ident() {
            if let Some(local) = frame.locals.lookup(name) {
                self.expr(frame, value)?;
                self.store_local(local);
                return Ok(());
            }
            if let Some((slot, 0)) = self.input.storage(name) {
                self.expr(frame, value)?;
                self.asm.emit_push_u64(slot);
                self.asm.emit_op(SSTORE);
                return Ok(());
            }
        }
        if let Some((name, keys)) = target.index_chain() {
            if frame.locals.lookup(name).is_none() {
                if let Some((slot, depth)) = self.input.storage(name) {
                    if depth == keys.len() && depth > 0 {
                        self.expr(frame, value)?;
                        self.mapping_slot(frame, slot, &keys)?;
                        self.asm.emit_op(SSTORE);
                        return Ok(());
                    }
                }
            }
        }
        Err(CodegenError::unsupported("assignment target", target.position))
    }

    /// Pushes exactly one word
    fn expr(&mut self, frame: &mut Frame, expr: &Expr) -> GenResult<()> {
        match &expr.kind {
            ExprKind::Literal(literal) => self.literal(literal, expr.position)?,
            ExprKind::Ident(name) => {
                if let Some(local) = frame.locals.lookup(name) {
                    self.load_local(local);
                } else {
                    match self.input.storage(name) {
                        Some((slot, 0)) => {
                            self.asm.emit_push_u64(slot);
                            self.asm.emit_op(SLOAD);
                        }
                        _ => return Err(CodegenError::unsupported(format!("value of `{name}`"), expr.position)),
                    }
                }
            }
            ExprKind::Binary { op: BinaryOp::And, lhs, rhs } => self.short_circuit(frame, lhs, rhs, true)?,
            ExprKind::Binary { op: BinaryOp::Or, lhs, rhs } => self.short_circuit(frame, lhs, rhs, false)?,
            ExprKind::Binary { op, lhs, rhs } => {
                self.expr(frame, lhs)?;
                self.expr(frame, rhs)?;
                // stack is [lhs, rhs]; EVM binary ops take their first operand from the top
                let ops: &[u8] = match op {
                    BinaryOp::Add => &[ADD],
                    BinaryOp::Mul => &[MUL],
                    BinaryOp::Sub => &[SWAP1, SUB],
                    BinaryOp::Div => &[SWAP1, DIV],
                    BinaryOp::Mod => &[SWAP1, MOD],
                    BinaryOp::Eq => &[EQ],
                    BinaryOp::Ne => &[EQ, ISZERO],
                    BinaryOp::Lt => &[GT],
                    BinaryOp::Gt => &[LT],
                    BinaryOp::Le => &[LT, ISZERO],
                    BinaryOp::Ge => &[GT, ISZERO],
                    BinaryOp::And | BinaryOp::Or => &[],
                };
                self.asm.emit_ops(ops);
            }
            ExprKind::Unary { op: UnaryOp::Not, operand } => {
                self.expr(frame, operand)?;
                self.asm.emit_op(ISZERO);
            }
            ExprKind::Unary { op: UnaryOp::Neg, operand } => {
                self.expr(frame, operand)?;
                self.asm.emit_ops(&[PUSH0, SUB]);
            }
            ExprKind::Call { callee, args } => {
                self.call(frame, callee, args, true)?;
            }
            ExprKind::Member { member, .. } => {
                let opcode = match expr.as_builtin() {
                    Some(Builtin::MsgSender) => CALLER,
                    Some(Builtin::MsgValue) => CALLVALUE,
                    Some(Builtin::BlockTimestamp) => TIMESTAMP,
                    Some(Builtin::BlockNumber) => NUMBER,
                    None => {
                        return Err(CodegenError::unsupported(
                            format!("member access `.{}`", member.name),
                            expr.position,
                        ))
                    }
                };
                self.asm.emit_op(opcode);
            }
            ExprKind::Index { .. } => {
                let mapping = expr.index_chain().and_then(|(name, keys)| {
                    if frame.locals.lookup(name).is_some() {
                        return None;
                    }
                    match self.input.storage(name) {
                        Some((slot, depth)) if depth > 0 && depth == keys.len() => Some((slot, keys)),
                        _ => None,
                    }
                });
                let (slot, keys) = mapping.ok_or_else(|| {
                    CodegenError::unsupported("array indexing outside mpc functions", expr.position)
                })?;
                self.mapping_slot(frame, slot, &keys)?;
                self.asm.emit_op(SLOAD);
            }
            ExprKind::Array(_) => {
                return Err(CodegenError::unsupported("array literal", expr.position));
            }
            ExprKind::Reveal(_) => {
                return Err(CodegenError::unsupported("reveal outside mpc functions", expr.position));
            }
        }
        Ok(())
    }

    fn literal(&mut self, literal: &Literal, position: Position) -> GenResult<()> {
        let value = match literal {
            Literal::Number(value) => *value,
            Literal::Bool(value) => U256::from(u8::from(*value)),
            Literal::Address(address) => U256::from_be_slice(address.as_slice()),
            // bytesN values are left-aligned in the word
            Literal::HexBytes(bytes) if bytes.len() <= 32 => {
                let mut word = [0u8; 32];
                word[..bytes.len()].copy_from_slice(bytes);
                U256::from_be_bytes(word)
            }
            Literal::HexBytes(bytes) => {
                return Err(CodegenError::unsupported(
                    format!("hex literal of {} bytes", bytes.len()),
                    position,
                ))
            }
            Literal::Str(_) => {
                return Err(CodegenError::unsupported("string literal outside a require message", position))
            }
        };
        self.asm.emit_push(value);
        Ok(())
    }

    /// `&&` and `||` evaluate the right side only when needed; both yield 0 or 1
    fn short_circuit(&mut self, frame: &mut Frame, lhs: &Expr, rhs: &Expr, and: bool) -> GenResult<()> {
        let end = self.asm.new_label();
        self.expr(frame, lhs)?;
        self.asm.emit_op(DUP1);
        if and {
            self.asm.emit_op(ISZERO);
        }
        self.asm.jump_if(end);
        self.asm.emit_op(POP);
        self.expr(frame, rhs)?;
        self.asm.jump_target(end);
        self.asm.emit_ops(&[ISZERO, ISZERO]);
        Ok(())
    }

    /// Internal call; returns whether a value was left on the stack
    fn call(&mut self, frame: &mut Frame, callee: &Ident, args: &[Expr], want_value: bool) -> GenResult<bool> {
        let contract = self.input.contract;
        let function = contract
            .function(&callee.name)
            .ok_or_else(|| CodegenError::unsupported(format!("call to `{}`", callee.name), callee.position))?;
        if want_value && function.returns.len() != 1 {
            return Err(CodegenError::unsupported(
                format!("`{}` used as a single value", callee.name),
                callee.position,
            ));
        }

        let back = self.asm.new_label();
        self.asm.emit_push_label(back);
        for arg in args {
            self.expr(frame, arg)?;
        }
        let body = self.body(&callee.name)?;
        self.asm.jump(body);
        self.asm.jump_target(back);

        if want_value {
            self.load_from(RETURN_BUFFER);
        }
        Ok(want_value)
    }

    /// Pushes the storage slot of `base[k1][k2]...`
    fn mapping_slot(&mut self, frame: &mut Frame, base: u64, keys: &[&Expr]) -> GenResult<()> {
        self.asm.emit_push_u64(base);
        for key in keys {
            self.expr(frame, key)?;
            self.hash_slot();
        }
        Ok(())
    }

    /// `[slot, key]` -> `[keccak256(key . slot)]`
    fn hash_slot(&mut self) {
        self.asm.emit_ops(&[PUSH0, MSTORE]);
        self.store_to(SCRATCH_HIGH);
        self.asm.emit_push_u64(0x40);
        self.asm.emit_ops(&[PUSH0, KECCAK256]);
    }

    fn body(&self, name: &str) -> GenResult<Label> {
        self.bodies
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::InvalidModule(format!("no body for function `{name}`")))
    }

    fn check_external_types(&self, params: &[Param], returns: &[TypeName], position: Position) -> GenResult<()> {
        if let Some(param) = params.iter().find(|p| !p.ty.is_word()) {
            return Err(CodegenError::unsupported(
                format!("external parameter `{}` of type {}", param.name.name, param.ty.canonical()),
                param.name.position,
            ));
        }
        if let Some(ty) = returns.iter().find(|t| !t.is_word()) {
            return Err(CodegenError::unsupported(format!("external return type {}", ty.canonical()), position));
        }
        if returns.len() > MAX_RETURN_WORDS {
            return Err(CodegenError::unsupported(format!("more than {MAX_RETURN_WORDS} return values"), position));
        }
        Ok(())
    }

    /// Reverts unless calldata holds a selector and `words` arguments
    fn require_calldata(&mut self, words: usize) {
        self.asm.emit_push_u64(4 + WORD * words as u64);
        self.asm.emit_ops(&[CALLDATASIZE, LT]);
        self.asm.jump_if(self.bare_revert);
    }

    fn load_argument(&mut self, index: usize) {
        self.asm.emit_push_u64(4 + WORD * index as u64);
        self.asm.emit_op(CALLDATALOAD);
    }

    fn return_words(&mut self, words: usize) {
        if words == 0 {
            self.asm.emit_op(STOP);
        } else {
            self.asm.emit_push_u64(WORD * words as u64);
            self.asm.emit_push_u64(RETURN_BUFFER);
            self.asm.emit_op(RETURN);
        }
    }

    fn revert_with(&mut self, code: u64) {
        if code != REVERT_BARE {
            self.asm.emit_push_u64(code);
            self.asm.emit_ops(&[PUSH0, MSTORE]);
            self.asm.emit_push_u64(WORD);
        } else {
            self.asm.emit_op(PUSH0);
        }
        self.asm.emit_ops(&[PUSH0, REVERT]);
    }

    fn load_from(&mut self, address: u64) {
        self.asm.emit_push_u64(address);
        self.asm.emit_op(MLOAD);
    }

    fn store_to(&mut self, address: u64) {
        self.asm.emit_push_u64(address);
        self.asm.emit_op(MSTORE);
    }

    fn local_address(&mut self, index: u32) {
        self.load_from(FRAME_PTR);
        self.asm.emit_push_u64(WORD * (u64::from(index) + 1));
        self.asm.emit_op(ADD);
    }

    fn load_local(&mut self, index: u32) {
        self.local_address(index);
        self.asm.emit_op(MLOAD);
    }

    fn store_local(&mut self, index: u32) {
        self.local_address(index);
        self.asm.emit_op(MSTORE);
    }

    /// Pushes the allocation pointer plus `offset`
    fn free_pointer(&mut self, offset: u64) {
        self.load_from(ALLOC_PTR);
        if offset != 0 {
            self.asm.emit_push_u64(offset);
            self.asm.emit_op(ADD);
        }
    }

    fn store_free(&mut self, offset: u64) {
        self.free_pointer(offset);
        self.asm.emit_op(MSTORE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::build_abi;
    use crate::layout::allocate;
    use crate::lexer::tokenize;
    use crate::options::CompileOptions;
    use crate::parser::parse_tokens;
    use crate::semantic::analyze;

    fn compile(source: &str) -> Result<EvmArtifact> {
        let mut contract = parse_tokens(&tokenize(source).unwrap()).unwrap();
        let model = analyze(&contract, &CompileOptions::default()).unwrap();
        let layout = allocate(&mut contract);
        let abi = build_abi(&contract, &layout);
        EvmCodegen::new(CodegenInput::new(&contract, &model, &layout, &abi)).compile()
    }

    #[test]
    fn test_deploy_code_returns_runtime() {
        let runtime = vec![0x5b, 0x00];
        let deploy = deploy_code(&runtime);
        assert_eq!(&deploy[..INIT_CODE_LEN], &[0x61, 0x00, 0x02, 0x80, 0x61, 0x00, 0x0b, 0x5f, 0x39, 0x5f, 0xf3]);
        assert_eq!(&deploy[INIT_CODE_LEN..], &runtime[..]);
    }

    #[test]
    fn test_empty_contract_reverts_on_any_call() {
        let artifact = compile("contract Empty { }").unwrap();
        assert!(artifact.selectors.is_empty());
        // PUSH2 0x0180 PUSH1 0x40 MSTORE
        assert_eq!(&artifact.bytecode[..6], &[0x61, 0x01, 0x80, 0x60, 0x40, 0x52]);
        assert_eq!(artifact.bytecode.last(), Some(&REVERT));
    }

    #[test]
    fn test_selector_offsets_point_at_jumpdests() {
        let artifact = compile(
            "contract Token {
                mapping(address => uint256) public balances;
                uint256 public supply;
                function mint(address to, uint256 amount) public {
                    balances[to] += amount;
                    supply += amount;
                }
            }",
        )
        .unwrap();
        assert_eq!(artifact.selectors.len(), 3);
        for entry in &artifact.selectors {
            assert_eq!(artifact.bytecode[entry.offset], JUMPDEST, "{}", entry.signature);
        }
    }

    #[test]
    fn test_dispatch_contains_every_selector() {
        let artifact = compile(
            "contract C {
                function transfer(address to, uint256 amount) public returns (bool) { return true; }
            }",
        )
        .unwrap();
        let push4 = [0x63, 0xa9, 0x05, 0x9c, 0xbb];
        assert!(artifact.bytecode.windows(5).any(|w| w == push4));
    }

    #[test]
    fn test_verifier_address_is_embedded() {
        let artifact = compile(
            "contract C {
                circuit Ownership {
                    private witness secret;
                    public input commitment;
                    constraint commitment == poseidon([secret]);
                }
                function claim(uint256 commitment, proof p) public circuit Ownership { }
            }",
        )
        .unwrap();
        let mut push_address = vec![0x61];
        push_address.extend_from_slice(&[0x0a, 0x01]);
        assert!(artifact.bytecode.windows(3).any(|w| w == push_address.as_slice()));
        assert_eq!(artifact.offchain.circuits.len(), 1);
    }

    #[test]
    fn test_array_literal_is_unsupported() {
        let err = compile(
            "contract C {
                function f() public returns (uint256) { uint256 x = [1, 2]; return x; }
            }",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::CompilerError::Codegen(CodegenError::UnsupportedConstruct { .. })
        ));
    }

    #[test]
    fn test_size_limit_only_warns() {
        let source = "contract C { uint256 public a; function f(uint256 x) public { a = x; } }";
        let mut contract = parse_tokens(&tokenize(source).unwrap()).unwrap();
        let model = analyze(&contract, &CompileOptions::default()).unwrap();
        let layout = allocate(&mut contract);
        let abi = build_abi(&contract, &layout);
        let config = CodegenConfig { max_code_size: 1, ..CodegenConfig::default() };
        let artifact =
            EvmCodegen::with_config(CodegenInput::new(&contract, &model, &layout, &abi), config).compile().unwrap();
        assert!(artifact.bytecode.len() > 1);
    }
}
