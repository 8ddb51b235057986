//! WASM module generation
//!
//! Every Veil value is an `i64`. State lives in the host-provided linear
//! memory at `0x1000 + slot * 8`; mapping entries, logging, environment reads
//! and proof checks go through host imports. The module defines one function
//! per getter, contract function and MPC stub, and exports each ABI entry
//! under its canonical signature.

use tracing::{debug, instrument, warn};
use veil_runtime::{ExportEntry, WasmArtifact};
use wasm_encoder::{
    BlockType, CodeSection, EntityType, ExportKind, ExportSection, Function, FunctionSection,
    ImportSection, Instruction, MemArg, MemoryType, Module, TypeSection, ValType,
};

use super::{count_locals, validate_wasm, CodegenConfig, CodegenInput, Locals};
use crate::abi::{AbiEntry, EntryKind, REVERT_PROOF_FAILED};
use crate::ast::*;
use crate::error::{CodegenError, Result};
use crate::token::Position;

/// Start of the value storage region; below it is call scratch
const STORAGE_BASE: u64 = 0x1000;
const WORD_BYTES: u32 = 8;
const SCRATCH_WORDS: usize = (STORAGE_BASE / WORD_BYTES as u64) as usize;

type GenResult<T> = std::result::Result<T, CodegenError>;

/// Indices of the host imports, which occupy the first function slots
pub mod host {
    pub const REVERT: u32 = 0;
    pub const VERIFY_PROOF: u32 = 1;
    pub const VERIFY_MPC: u32 = 2;
    pub const MAPPING_SLOT: u32 = 3;
    pub const MAPPING_LOAD: u32 = 4;
    pub const MAPPING_STORE: u32 = 5;
    pub const EMIT_LOG: u32 = 6;
    pub const MSG_SENDER: u32 = 7;
    pub const MSG_VALUE: u32 = 8;
    pub const BLOCK_TIMESTAMP: u32 = 9;
    pub const BLOCK_NUMBER: u32 = 10;
}

use ValType::{I32, I64};

/// `env` imports in function index order: name, params, results
const HOST_IMPORTS: [(&str, &[ValType], &[ValType]); 11] = [
    // revert(code)
    ("revert", &[I64], &[]),
    // verify_proof(circuit_index, proof, signals_ptr, signals_len) -> ok
    ("verify_proof", &[I64, I64, I32, I32], &[I32]),
    // verify_mpc(descriptor_index, proof, values_ptr, values_len) -> ok
    ("verify_mpc", &[I64, I64, I32, I32], &[I32]),
    // mapping_slot(base, key) -> slot
    ("mapping_slot", &[I64, I64], &[I64]),
    ("mapping_load", &[I64], &[I64]),
    ("mapping_store", &[I64, I64], &[]),
    // emit_log(topic_prefix, data_ptr, data_len)
    ("emit_log", &[I64, I32, I32], &[]),
    ("msg_sender", &[], &[I64]),
    ("msg_value", &[], &[I64]),
    ("block_timestamp", &[], &[I64]),
    ("block_number", &[], &[I64]),
];

const IMPORT_COUNT: u32 = HOST_IMPORTS.len() as u32;

fn word(offset: u64) -> MemArg {
    MemArg { offset, align: 3, memory_index: 0 }
}

/// Deduplicated function signatures
#[derive(Debug, Default)]
struct TypeRegistry {
    types: Vec<(Vec<ValType>, Vec<ValType>)>,
}

impl TypeRegistry {
    fn index(&mut self, params: &[ValType], results: &[ValType]) -> u32 {
        if let Some(index) = self.types.iter().position(|(p, r)| p == params && r == results) {
            return index as u32;
        }
        self.types.push((params.to_vec(), results.to_vec()));
        (self.types.len() - 1) as u32
    }
}

/// A defined function in module order
enum Defined<'a> {
    Getter(&'a AbiEntry),
    Function(&'a FunctionDecl, Option<&'a AbiEntry>),
    MpcStub(&'a MpcFunctionDecl, &'a AbiEntry),
}

struct Lowered {
    type_index: u32,
    body: Function,
}

#[derive(Debug, Clone)]
pub struct WasmCodegen<'a> {
    input: CodegenInput<'a>,
    config: CodegenConfig,
}

impl<'a> WasmCodegen<'a> {
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
    pub fn compile(&self) -> Result<WasmArtifact> {
        let defined = self.defined_functions()?;

        let mut registry = TypeRegistry::default();
        for (_, params, results) in HOST_IMPORTS {
            registry.index(params, results);
        }
        let lowered = defined
            .iter()
            .map(|function| self.lower(function, &mut registry))
            .collect::<GenResult<Vec<_>>>()?;

        let mut module = Module::new();

        let mut types = TypeSection::new();
        self.add_type_definitions(&mut types, &registry);
        module.section(&types);

        let mut imports = ImportSection::new();
        self.add_host_imports(&mut imports, &mut registry);
        module.section(&imports);

        let mut functions = FunctionSection::new();
        self.add_function_declarations(&mut functions, &lowered);
        module.section(&functions);

        let exports = self.export_table(&defined);
        let mut export_section = ExportSection::new();
        self.add_exports(&mut export_section, &exports);
        module.section(&export_section);

        let mut code = CodeSection::new();
        self.add_function_implementations(&mut code, &lowered);
        module.section(&code);

        if self.config.embed_metadata {
            self.add_metadata_section(&mut module);
        }

        let wasm_bytes = module.finish();
        validate_wasm(&wasm_bytes)?;

        if wasm_bytes.len() > self.config.max_module_size {
            warn!(
                size = wasm_bytes.len(),
                limit = self.config.max_module_size,
                "WASM module exceeds the size target"
            );
        }
        debug!(bytes = wasm_bytes.len(), exports = exports.len(), "generated wasm module");

        Ok(WasmArtifact {
            contract: self.input.contract.name.name.clone(),
            module: wasm_bytes,
            exports,
            storage: self.input.layout.entries.clone(),
            revert_reasons: self.input.abi.revert_reasons.clone(),
            offchain: self.input.offchain(),
        })
    }

    /// Pairs declarations with their ABI entries, in declaration order
    fn defined_functions(&self) -> GenResult<Vec<Defined<'a>>> {
        let contract = self.input.contract;
        let mut entries = self.input.abi.entries.iter();
        let mut next_entry = |name: &str| {
            entries
                .next()
                .filter(|entry| entry.name == name)
                .ok_or_else(|| CodegenError::InvalidModule(format!("abi entry for `{name}` out of order")))
        };

        let mut defined = Vec::new();
        for item in &contract.items {
            match item {
                Item::StateVar(var) if var.visibility == Visibility::Public => {
                    defined.push(Defined::Getter(next_entry(&var.name.name)?));
                }
                Item::Mapping(mapping) if mapping.visibility == Visibility::Public => {
                    defined.push(Defined::Getter(next_entry(&mapping.name.name)?));
                }
                Item::Function(function) => {
                    let entry = if function.is_public() { Some(next_entry(&function.name.name)?) } else { None };
                    defined.push(Defined::Function(function, entry));
                }
                Item::MpcFunction(function) => {
                    defined.push(Defined::MpcStub(function, next_entry(&function.name.name)?));
                }
                _ => {}
            }
        }
        Ok(defined)
    }

    fn export_table(&self, defined: &[Defined<'_>]) -> Vec<ExportEntry> {
        defined
            .iter()
            .enumerate()
            .filter_map(|(position, function)| {
                let entry = match function {
                    Defined::Getter(entry) | Defined::MpcStub(_, entry) => Some(*entry),
                    Defined::Function(_, entry) => *entry,
                }?;
                Some(ExportEntry { name: entry.signature.clone(), function_index: IMPORT_COUNT + position as u32 })
            })
            .collect()
    }

    fn add_type_definitions(&self, types: &mut TypeSection, registry: &TypeRegistry) {
        for (params, results) in &registry.types {
            types.ty().function(params.clone(), results.clone());
        }
    }

    fn add_host_imports(&self, imports: &mut ImportSection, registry: &mut TypeRegistry) {
        for (name, params, results) in HOST_IMPORTS {
            imports.import("env", name, EntityType::Function(registry.index(params, results)));
        }

        imports.import(
            "env",
            "memory",
            EntityType::Memory(MemoryType {
                minimum: 1,
                maximum: Some(256),
                memory64: false,
                shared: false,
                page_size_log2: None,
            }),
        );
    }

    fn add_function_declarations(&self, functions: &mut FunctionSection, lowered: &[Lowered]) {
        for function in lowered {
            functions.function(function.type_index);
        }
    }

    fn add_exports(&self, section: &mut ExportSection, exports: &[ExportEntry]) {
        for export in exports {
            section.export(&export.name, ExportKind::Func, export.function_index);
        }
    }

    fn add_function_implementations(&self, code: &mut CodeSection, lowered: &[Lowered]) {
        for function in lowered {
            code.function(&function.body);
        }
    }

    fn add_metadata_section(&self, module: &mut Module) {
        let input = &self.input;
        let metadata_json = serde_json::json!({
            "contract": input.contract.name.name,
            "compiler_version": env!("CARGO_PKG_VERSION"),
            "entries": input.abi.signatures(),
            "storage": input.layout.entries,
            "circuits": input.model.circuits.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "mpc": input.model.mpc.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            "revert_reasons": input.abi.revert_reasons,
        });

        module.section(&wasm_encoder::CustomSection {
            name: "veil_metadata".into(),
            data: metadata_json.to_string().into_bytes().into(),
        });
    }

    fn lower(&self, function: &Defined<'a>, registry: &mut TypeRegistry) -> GenResult<Lowered> {
        let (params, results, body) = match function {
            Defined::Getter(entry) => {
                let (params, body) = self.getter(entry)?;
                (params, 1, body)
            }
            Defined::Function(function, _) => {
                let body = FunctionLowering::new(self.input, *function).run()?;
                (function.params.len(), function.returns.len(), body)
            }
            Defined::MpcStub(function, entry) => {
                let (params, body) = self.mpc_stub(function, entry)?;
                (params, function.returns.len(), body)
            }
        };
        let type_index = registry.index(&vec![I64; params], &vec![I64; results]);
        Ok(Lowered { type_index, body })
    }

    fn getter(&self, entry: &AbiEntry) -> GenResult<(usize, Function)> {
        let EntryKind::Getter { slot, keys, .. } = &entry.kind else {
            return Err(CodegenError::InvalidModule(format!("`{}` is not a getter", entry.signature)));
        };
        if let Some(output) = entry.outputs.iter().find(|o| o.ends_with("[]")) {
            return Err(CodegenError::unsupported(
                format!("getter `{}` of type {output}", entry.name),
                Position::default(),
            ));
        }

        let mut func = Function::new(vec![]);
        if *keys == 0 {
            func.instruction(&Instruction::I32Const(storage_address(*slot, Position::default())?));
            func.instruction(&Instruction::I64Load(word(0)));
        } else {
            func.instruction(&Instruction::I64Const(*slot as i64));
            for key in 0..*keys as u32 {
                func.instruction(&Instruction::LocalGet(key));
                func.instruction(&Instruction::Call(host::MAPPING_SLOT));
            }
            func.instruction(&Instruction::Call(host::MAPPING_LOAD));
        }
        func.instruction(&Instruction::End);
        Ok((*keys, func))
    }

    /// `(plain..., outputs..., proof) -> outputs`, accepted once the MPC
    /// verifier approves the staged values
    fn mpc_stub(&self, function: &MpcFunctionDecl, entry: &AbiEntry) -> GenResult<(usize, Function)> {
        if let Some(param) = function.plain_params.iter().find(|p| !p.ty.is_word()) {
            return Err(CodegenError::unsupported(
                format!("external parameter `{}` of type {}", param.name.name, param.ty.canonical()),
                param.name.position,
            ));
        }
        if let Some(ty) = function.returns.iter().find(|t| !t.is_word()) {
            return Err(CodegenError::unsupported(
                format!("external return type {}", ty.canonical()),
                function.position,
            ));
        }
        let index = self
            .input
            .model
            .mpc
            .iter()
            .position(|d| d.name == entry.name)
            .ok_or_else(|| CodegenError::InvalidModule(format!("no descriptor for `{}`", entry.name)))?;

        let plain = function.plain_params.len() as u32;
        let values = plain + function.returns.len() as u32;
        if values as usize > SCRATCH_WORDS {
            return Err(CodegenError::unsupported("mpc stub with too many values", function.position));
        }

        let mut func = Function::new(vec![]);
        for i in 0..values {
            func.instruction(&Instruction::I32Const((i * WORD_BYTES) as i32));
            func.instruction(&Instruction::LocalGet(i));
            func.instruction(&Instruction::I64Store(word(0)));
        }
        func.instruction(&Instruction::I64Const(index as i64));
        func.instruction(&Instruction::LocalGet(values));
        func.instruction(&Instruction::I32Const(0));
        func.instruction(&Instruction::I32Const((values * WORD_BYTES) as i32));
        func.instruction(&Instruction::Call(host::VERIFY_MPC));
        for instruction in revert_unless_ok() {
            func.instruction(&instruction);
        }
        for i in plain..values {
            func.instruction(&Instruction::LocalGet(i));
        }
        func.instruction(&Instruction::End);
        Ok((values as usize + 1, func))
    }
}

/// Reverts with the proof failure code when the i32 on the stack is zero
fn revert_unless_ok() -> [Instruction<'static>; 6] {
    [
        Instruction::I32Eqz,
        Instruction::If(BlockType::Empty),
        Instruction::I64Const(REVERT_PROOF_FAILED as i64),
        Instruction::Call(host::REVERT),
        Instruction::Unreachable,
        Instruction::End,
    ]
}

fn storage_address(slot: u64, position: Position) -> GenResult<i32> {
    slot.checked_mul(u64::from(WORD_BYTES))
        .and_then(|offset| offset.checked_add(STORAGE_BASE))
        .and_then(|address| i32::try_from(address).ok())
        .ok_or_else(|| CodegenError::unsupported(format!("storage slot {slot} beyond linear memory"), position))
}

/// Lowers one ordinary function body
struct FunctionLowering<'a> {
    input: CodegenInput<'a>,
    function: &'a FunctionDecl,
    locals: Locals,
    /// First index after the declared locals; scratch locals are taken from here
    next_scratch: u32,
    instructions: Vec<Instruction<'static>>,
}

impl<'a> FunctionLowering<'a> {
    fn new(input: CodegenInput<'a>, function: &'a FunctionDecl) -> Self {
        let locals = Locals::new(function.params.iter().map(|p| p.name.name.as_str()));
        let next_scratch = function.params.len() as u32 + count_locals(&function.body);
        Self { input, function, locals, next_scratch, instructions: Vec::new() }
    }

    fn run(mut self) -> GenResult<Function> {
        let function = self.function;
        if let Some(param) = function.params.iter().find(|p| !p.ty.is_word()) {
            return Err(CodegenError::unsupported(
                format!("array parameter `{}`", param.name.name),
                param.name.position,
            ));
        }
        if let Some(ty) = function.returns.iter().find(|t| !t.is_word()) {
            return Err(CodegenError::unsupported(format!("return type {}", ty.canonical()), function.position));
        }

        if let Some(circuit) = &function.circuit {
            self.verify_proof(circuit)?;
        }
        self.block(&function.body)?;
        // falling off the end returns zeroes
        for _ in &function.returns {
            self.emit(Instruction::I64Const(0));
        }
        self.emit(Instruction::End);

        let params = function.params.len() as u32;
        let extra = self.next_scratch - params;
        let mut func = Function::new(if extra > 0 { vec![(extra, I64)] } else { vec![] });
        for instruction in &self.instructions {
            func.instruction(instruction);
        }
        Ok(func)
    }

    fn emit(&mut self, instruction: Instruction<'static>) {
        self.instructions.push(instruction);
    }

    fn scratch(&mut self) -> u32 {
        let index = self.next_scratch;
        self.next_scratch += 1;
        index
    }

    fn verify_proof(&mut self, circuit: &Ident) -> GenResult<()> {
        let model = self.input.model;
        let index = model
            .circuits
            .iter()
            .position(|c| c.name == circuit.name)
            .ok_or_else(|| CodegenError::unsupported(format!("circuit `{}`", circuit.name), circuit.position))?;
        let system = &model.circuits[index];
        let proof = self
            .function
            .params
            .iter()
            .find(|p| p.ty == TypeName::Proof)
            .and_then(|p| self.locals.lookup(&p.name.name))
            .ok_or_else(|| {
                CodegenError::unsupported("circuit-backed function without proof", self.function.position)
            })?;

        let signals = system.public_signals();
        if signals.len() > SCRATCH_WORDS {
            return Err(CodegenError::unsupported("circuit with too many public signals", circuit.position));
        }
        for (i, signal) in signals.iter().enumerate() {
            let local = self.locals.lookup(&signal.name).ok_or_else(|| {
                CodegenError::unsupported(format!("unbound signal `{}`", signal.name), circuit.position)
            })?;
            self.emit(Instruction::I32Const((i as u32 * WORD_BYTES) as i32));
            self.emit(Instruction::LocalGet(local));
            self.emit(Instruction::I64Store(word(0)));
        }
        self.emit(Instruction::I64Const(index as i64));
        self.emit(Instruction::LocalGet(proof));
        self.emit(Instruction::I32Const(0));
        self.emit(Instruction::I32Const((signals.len() as u32 * WORD_BYTES) as i32));
        self.emit(Instruction::Call(host::VERIFY_PROOF));
        for instruction in revert_unless_ok() {
            self.emit(instruction);
        }
        Ok(())
    }

    fn block(&mut self, block: &[Stmt]) -> GenResult<()> {
        self.locals.push();
        for stmt in block {
            self.stmt(stmt)?;
        }
        self.locals.pop();
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> GenResult<()> {
        match &stmt.kind {
            StmtKind::Require { condition, message } => {
                let code = self.input.abi.revert_code(message.as_deref());
                self.expr(condition)?;
                self.emit(Instruction::I64Eqz);
                self.emit(Instruction::If(BlockType::Empty));
                self.emit(Instruction::I64Const(code as i64));
                self.emit(Instruction::Call(host::REVERT));
                self.emit(Instruction::Unreachable);
                self.emit(Instruction::End);
            }
            StmtKind::Assign { target, value } => self.assign(target, value)?,
            StmtKind::VarDecl { ty, name, value } => {
                if !ty.is_word() {
                    return Err(CodegenError::unsupported(
                        format!("local `{}` of type {}", name.name, ty.canonical()),
                        stmt.position,
                    ));
                }
                match value {
                    Some(value) => self.expr(value)?,
                    None => self.emit(Instruction::I64Const(0)),
                }
                let index = self.locals.declare(&name.name);
                self.emit(Instruction::LocalSet(index));
            }
            StmtKind::If { condition, then_block, else_block } => {
                self.condition(condition)?;
                self.emit(Instruction::If(BlockType::Empty));
                self.block(then_block)?;
                if let Some(else_block) = else_block {
                    self.emit(Instruction::Else);
                    self.block(else_block)?;
                }
                self.emit(Instruction::End);
            }
            StmtKind::For { init, condition, step, body } => {
                self.locals.push();
                if let Some(init) = init {
                    self.stmt(init)?;
                }
                self.emit(Instruction::Block(BlockType::Empty));
                self.emit(Instruction::Loop(BlockType::Empty));
                if let Some(condition) = condition {
                    self.expr(condition)?;
                    self.emit(Instruction::I64Eqz);
                    self.emit(Instruction::BrIf(1));
                }
                self.block(body)?;
                if let Some(step) = step {
                    self.stmt(step)?;
                }
                self.emit(Instruction::Br(0));
                self.emit(Instruction::End);
                self.emit(Instruction::End);
                self.locals.pop();
            }
            StmtKind::Return(values) => {
                for value in values {
                    self.expr(value)?;
                }
                self.emit(Instruction::Return);
            }
            StmtKind::Emit { event, args } => {
                let topic = self
                    .input
                    .abi
                    .event(&event.name)
                    .map(|e| e.topic)
                    .ok_or_else(|| CodegenError::unsupported(format!("event `{}`", event.name), event.position))?;
                if args.len() > SCRATCH_WORDS {
                    return Err(CodegenError::unsupported("event with too many arguments", event.position));
                }
                // evaluate everything before staging, arguments may call functions that emit
                let mut staged = Vec::with_capacity(args.len());
                for arg in args {
                    self.expr(arg)?;
                    let local = self.scratch();
                    self.emit(Instruction::LocalSet(local));
                    staged.push(local);
                }
                for (i, local) in staged.iter().enumerate() {
                    self.emit(Instruction::I32Const((i as u32 * WORD_BYTES) as i32));
                    self.emit(Instruction::LocalGet(*local));
                    self.emit(Instruction::I64Store(word(0)));
                }
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&topic[..8]);
                self.emit(Instruction::I64Const(i64::from_be_bytes(prefix)));
                self.emit(Instruction::I32Const(0));
                self.emit(Instruction::I32Const((args.len() as u32 * WORD_BYTES) as i32));
                self.emit(Instruction::Call(host::EMIT_LOG));
            }
            StmtKind::Expr(expr) => match &expr.kind {
                ExprKind::Call { callee, args } => {
                    let returned = self.call(callee, args, false)?;
                    for _ in 0..returned {
                        self.emit(Instruction::Drop);
                    }
                }
                _ => {
                    self.expr(expr)?;
                    self.emit(Instruction::Drop);
                }
            },
        }
        Ok(())
    }

    fn assign(&mut self, target: &Expr, value: &Expr) -> GenResult<()> {
        if let Some(name) = target.as_ident() {
            if let Some(local) = self.locals.lookup(name) {
                self.expr(value)?;
                self.emit(Instruction::LocalSet(local));
                return Ok(());
            }
            if let Some((slot, 0)) = self.input.storage(name) {
                self.emit(Instruction::I32Const(storage_address(slot, target.position)?));
                self.expr(value)?;
                self.emit(Instruction::I64Store(word(0)));
                return Ok(());
            }
        }
        if let Some((slot, keys)) = self.mapping_access(target) {
            self.expr(value)?;
            let staged = self.scratch();
            self.emit(Instruction::LocalSet(staged));
            self.mapping_slot(slot, &keys)?;
            self.emit(Instruction::LocalGet(staged));
            self.emit(Instruction::Call(host::MAPPING_STORE));
            return Ok(());
        }
        Err(CodegenError::unsupported("assignment target", target.position))
    }

    /// Base slot and keys of a fully indexed state mapping
    fn mapping_access<'e>(&self, expr: &'e Expr) -> Option<(u64, Vec<&'e Expr>)> {
        let (name, keys) = expr.index_chain()?;
        if self.locals.lookup(name).is_some() {
            return None;
        }
        match self.input.storage(name) {
            Some((slot, depth)) if depth > 0 && depth == keys.len() => Some((slot, keys)),
            _ => None,
        }
    }

    fn mapping_slot(&mut self, base: u64, keys: &[&Expr]) -> GenResult<()> {
        self.emit(Instruction::I64Const(base as i64));
        for key in keys {
            self.expr(key)?;
            self.emit(Instruction::Call(host::MAPPING_SLOT));
        }
        Ok(())
    }

    /// Leaves an i32 that is non-zero when the i64 condition is
    fn condition(&mut self, condition: &Expr) -> GenResult<()> {
        self.expr(condition)?;
        self.emit(Instruction::I64Eqz);
        self.emit(Instruction::I32Eqz);
        Ok(())
    }

    /// Pushes exactly one i64
    fn expr(&mut self, expr: &Expr) -> GenResult<()> {
        match &expr.kind {
            ExprKind::Literal(literal) => {
                let value = literal_value(literal, expr.position)?;
                self.emit(Instruction::I64Const(value as i64));
            }
            ExprKind::Ident(name) => {
                if let Some(local) = self.locals.lookup(name) {
                    self.emit(Instruction::LocalGet(local));
                } else {
                    match self.input.storage(name) {
                        Some((slot, 0)) => {
                            self.emit(Instruction::I32Const(storage_address(slot, expr.position)?));
                            self.emit(Instruction::I64Load(word(0)));
                        }
                        _ => return Err(CodegenError::unsupported(format!("value of `{name}`"), expr.position)),
                    }
                }
            }
            ExprKind::Binary { op: BinaryOp::And, lhs, rhs } => {
                self.condition(lhs)?;
                self.emit(Instruction::If(BlockType::Result(I64)));
                self.boolean(rhs)?;
                self.emit(Instruction::Else);
                self.emit(Instruction::I64Const(0));
                self.emit(Instruction::End);
            }
            ExprKind::Binary { op: BinaryOp::Or, lhs, rhs } => {
                self.condition(lhs)?;
                self.emit(Instruction::If(BlockType::Result(I64)));
                self.emit(Instruction::I64Const(1));
                self.emit(Instruction::Else);
                self.boolean(rhs)?;
                self.emit(Instruction::End);
            }
            ExprKind::Binary { op: op @ (BinaryOp::Div | BinaryOp::Mod), lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                let divisor = self.scratch();
                let dividend = self.scratch();
                self.emit(Instruction::LocalSet(divisor));
                self.emit(Instruction::LocalSet(dividend));
                // x / 0 and x % 0 are 0, matching the EVM
                self.emit(Instruction::LocalGet(divisor));
                self.emit(Instruction::I64Eqz);
                self.emit(Instruction::If(BlockType::Result(I64)));
                self.emit(Instruction::I64Const(0));
                self.emit(Instruction::Else);
                self.emit(Instruction::LocalGet(dividend));
                self.emit(Instruction::LocalGet(divisor));
                self.emit(if *op == BinaryOp::Div { Instruction::I64DivU } else { Instruction::I64RemU });
                self.emit(Instruction::End);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                let (instruction, compare) = match op {
                    BinaryOp::Add => (Instruction::I64Add, false),
                    BinaryOp::Sub => (Instruction::I64Sub, false),
                    BinaryOp::Mul => (Instruction::I64Mul, false),
                    BinaryOp::Eq => (Instruction::I64Eq, true),
                    BinaryOp::Ne => (Instruction::I64Ne, true),
                    BinaryOp::Lt => (Instruction::I64LtU, true),
                    BinaryOp::Le => (Instruction::I64LeU, true),
                    BinaryOp::Gt => (Instruction::I64GtU, true),
                    BinaryOp::Ge => (Instruction::I64GeU, true),
                    BinaryOp::Div | BinaryOp::Mod | BinaryOp::And | BinaryOp::Or => {
                        return Err(CodegenError::InvalidModule(format!("operator `{}`", op.symbol())))
                    }
                };
                self.emit(instruction);
                if compare {
                    self.emit(Instruction::I64ExtendI32U);
                }
            }
            ExprKind::Unary { op: UnaryOp::Not, operand } => {
                self.expr(operand)?;
                self.emit(Instruction::I64Eqz);
                self.emit(Instruction::I64ExtendI32U);
            }
            ExprKind::Unary { op: UnaryOp::Neg, operand } => {
                self.emit(Instruction::I64Const(0));
                self.expr(operand)?;
                self.emit(Instruction::I64Sub);
            }
            ExprKind::Call { callee, args } => {
                self.call(callee, args, true)?;
            }
            ExprKind::Member { member, .. } => {
                let import = match expr.as_builtin() {
                    Some(Builtin::MsgSender) => host::MSG_SENDER,
                    Some(Builtin::MsgValue) => host::MSG_VALUE,
                    Some(Builtin::BlockTimestamp) => host::BLOCK_TIMESTAMP,
                    Some(Builtin::BlockNumber) => host::BLOCK_NUMBER,
                    None => {
                        return Err(CodegenError::unsupported(
                            format!("member access `.{}`", member.name),
                            expr.position,
                        ))
                    }
                };
                self.emit(Instruction::Call(import));
            }
            ExprKind::Index { .. } => {
                let (slot, keys) = self.mapping_access(expr).ok_or_else(|| {
                    CodegenError::unsupported("array indexing outside mpc functions", expr.position)
                })?;
                self.mapping_slot(slot, &keys)?;
                self.emit(Instruction::Call(host::MAPPING_LOAD));
            }
            ExprKind::Array(_) => return Err(CodegenError::unsupported("array literal", expr.position)),
            ExprKind::Reveal(_) => {
                return Err(CodegenError::unsupported("reveal outside mpc functions", expr.position))
            }
        }
        Ok(())
    }

    /// Pushes 0 or 1
    fn boolean(&mut self, expr: &Expr) -> GenResult<()> {
        self.condition(expr)?;
        self.emit(Instruction::I64ExtendI32U);
        Ok(())
    }

    /// Returns the number of values the call leaves on the stack
    fn call(&mut self, callee: &Ident, args: &[Expr], want_value: bool) -> GenResult<usize> {
        let contract = self.input.contract;
        let index = self
            .function_index(&callee.name)
            .ok_or_else(|| CodegenError::unsupported(format!("call to `{}`", callee.name), callee.position))?;
        let returns = contract.function(&callee.name).map_or(0, |f| f.returns.len());
        if want_value && returns != 1 {
            return Err(CodegenError::unsupported(
                format!("`{}` used as a single value", callee.name),
                callee.position,
            ));
        }
        for arg in args {
            self.expr(arg)?;
        }
        self.emit(Instruction::Call(index));
        Ok(returns)
    }

    /// Function index of a contract function; defined functions follow the
    /// imports in declaration order, getters and stubs included
    fn function_index(&self, name: &str) -> Option<u32> {
        let mut index = IMPORT_COUNT;
        for item in &self.input.contract.items {
            match item {
                Item::Function(function) if function.name.name == name => return Some(index),
                Item::StateVar(var) if var.visibility == Visibility::Public => index += 1,
                Item::Mapping(mapping) if mapping.visibility == Visibility::Public => index += 1,
                Item::Function(_) | Item::MpcFunction(_) => index += 1,
                _ => {}
            }
        }
        None
    }
}

/// Value of a literal as a 64-bit word
fn literal_value(literal: &Literal, position: Position) -> GenResult<u64> {
    let too_wide = |what: &str| CodegenError::unsupported(format!("{what} wider than 64 bits"), position);
    match literal {
        Literal::Number(value) => u64::try_from(*value).map_err(|_| too_wide("integer literal")),
        Literal::Bool(value) => Ok(u64::from(*value)),
        Literal::Address(address) => {
            let value = alloy_primitives::U256::from_be_slice(address.as_slice());
            u64::try_from(value).map_err(|_| too_wide("address literal"))
        }
        Literal::HexBytes(bytes) if bytes.len() <= 8 => {
            Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
        }
        Literal::HexBytes(_) => Err(too_wide("hex literal")),
        Literal::Str(_) => Err(CodegenError::unsupported("string literal outside a require message", position)),
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

    fn compile_with(source: &str, config: CodegenConfig) -> Result<WasmArtifact> {
        let mut contract = parse_tokens(&tokenize(source).unwrap()).unwrap();
        let model = analyze(&contract, &CompileOptions::default()).unwrap();
        let layout = allocate(&mut contract);
        let abi = build_abi(&contract, &layout);
        WasmCodegen::with_config(CodegenInput::new(&contract, &model, &layout, &abi), config).compile()
    }

    fn compile(source: &str) -> Result<WasmArtifact> {
        compile_with(source, CodegenConfig::default())
    }

    #[test]
    fn test_empty_contract_generates_valid_wasm() {
        let artifact = compile("contract Empty { }").unwrap();
        assert!(artifact.exports.is_empty());
        validate_wasm(&artifact.module).expect("module should be valid");
    }

    #[test]
    fn test_export_indices_skip_private_functions() {
        let artifact = compile(
            "contract C {
                uint256 public total;
                function helper(uint256 x) returns (uint256) { return x * 2; }
                function bump(uint256 x) public { total = total + helper(x); }
            }",
        )
        .unwrap();
        let exports: Vec<_> = artifact.exports.iter().map(|e| (e.name.as_str(), e.function_index)).collect();
        assert_eq!(exports, vec![("total()", IMPORT_COUNT), ("bump(uint256)", IMPORT_COUNT + 2)]);
    }

    #[test]
    fn test_wide_literal_is_unsupported() {
        let err = compile(
            "contract C {
                function f() public returns (uint256) { return 18446744073709551616; }
            }",
        )
        .unwrap_err();
        assert!(err.to_string().contains("wider than 64 bits"));
    }

    #[test]
    fn test_literal_values() {
        let position = Position::default();
        assert_eq!(literal_value(&Literal::Bool(true), position).unwrap(), 1);
        assert_eq!(literal_value(&Literal::HexBytes(vec![0x01, 0x02]), position).unwrap(), 0x0102);
        assert!(literal_value(&Literal::HexBytes(vec![0; 9]), position).is_err());
        assert!(literal_value(&Literal::Str("x".into()), position).is_err());
    }

    #[test]
    fn test_metadata_section_toggle() {
        let source = "contract Meta { uint256 public value; }";
        let with = compile(source).unwrap();
        let without = compile_with(source, CodegenConfig { embed_metadata: false, ..CodegenConfig::default() })
            .unwrap();
        let contains = |bytes: &[u8]| bytes.windows(13).any(|w| w == b"veil_metadata");
        assert!(contains(&with.module));
        assert!(!contains(&without.module));
    }

    #[test]
    fn test_storage_address() {
        assert_eq!(storage_address(0, Position::default()).unwrap(), 0x1000);
        assert_eq!(storage_address(3, Position::default()).unwrap(), 0x1018);
        assert!(storage_address(u64::MAX, Position::default()).is_err());
    }

    #[test]
    fn test_type_registry_deduplicates() {
        let mut registry = TypeRegistry::default();
        let a = registry.index(&[I64], &[]);
        let b = registry.index(&[I64, I64], &[I64]);
        assert_eq!(registry.index(&[I64], &[]), a);
        assert_ne!(a, b);
        assert_eq!(registry.types.len(), 2);
    }
}
