//! Semantic analysis
//!
//! Every circuit, MPC function and ordinary function is an independent unit.
//! Units are checked (optionally in parallel), their results merged back in
//! declaration order, and the first unit with errors fails the compilation
//! with all of that unit's errors.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::{debug, instrument};
use veil_runtime::{ConstraintSystem, MpcDescriptor, SignalKind};

use crate::ast::*;
use crate::circuit::compile_circuit;
use crate::error::{CompilerError, Result, SemanticError};
use crate::mpc::compile_mpc;
use crate::options::CompileOptions;
use crate::token::Position;

/// Off-chain units produced by the semantic pass, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemanticModel {
    pub circuits: Vec<ConstraintSystem>,
    pub mpc: Vec<MpcDescriptor>,
}

impl SemanticModel {
    pub fn circuit(&self, name: &str) -> Option<&ConstraintSystem> {
        self.circuits.iter().find(|c| c.name == name)
    }

    pub fn mpc(&self, name: &str) -> Option<&MpcDescriptor> {
        self.mpc.iter().find(|d| d.name == name)
    }
}

enum Unit<'a> {
    Circuit(&'a CircuitDecl),
    Mpc(&'a MpcFunctionDecl),
    Function(&'a FunctionDecl),
}

enum UnitOutput {
    Circuit(ConstraintSystem),
    Mpc(MpcDescriptor),
    Checked,
}

#[instrument(level = "debug", skip_all, fields(contract = %contract.name.name))]
pub fn analyze(contract: &ContractDecl, options: &CompileOptions) -> Result<SemanticModel> {
    let units: Vec<Unit<'_>> = contract
        .items
        .iter()
        .filter_map(|item| match item {
            Item::Circuit(c) => Some(Unit::Circuit(c)),
            Item::MpcFunction(f) => Some(Unit::Mpc(f)),
            Item::Function(f) => Some(Unit::Function(f)),
            _ => None,
        })
        .collect();

    let run = |unit: &Unit<'_>| -> Result<UnitOutput> {
        options.checkpoint()?;
        let (name, outcome) = match unit {
            Unit::Circuit(c) => (&c.name.name, compile_circuit(c).map(UnitOutput::Circuit)),
            Unit::Mpc(f) => (&f.name.name, compile_mpc(f, contract).map(UnitOutput::Mpc)),
            Unit::Function(f) => {
                (&f.name.name, FunctionChecker::new(contract, f).run().map(|()| UnitOutput::Checked))
            }
        };
        outcome.map_err(|errors| CompilerError::Semantic { unit: name.clone(), errors })
    };

    let results: Vec<Result<UnitOutput>> = if options.parallel {
        units.par_iter().map(run).collect()
    } else {
        units.iter().map(run).collect()
    };

    // Cancellation anywhere wins over ordinary errors
    if results.iter().any(|r| matches!(r, Err(CompilerError::Cancelled))) {
        return Err(CompilerError::Cancelled);
    }

    let mut model = SemanticModel::default();
    for result in results {
        match result? {
            UnitOutput::Circuit(system) => model.circuits.push(system),
            UnitOutput::Mpc(descriptor) => model.mpc.push(descriptor),
            UnitOutput::Checked => {}
        }
    }
    debug!(
        units = units.len(),
        circuits = model.circuits.len(),
        mpc = model.mpc.len(),
        "semantic analysis complete"
    );
    Ok(model)
}

/// Value classes told apart by the checker. Widths of `uintN` and `bytesN`
/// are not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ty {
    Uint,
    Bool,
    Address,
    Bytes,
    /// Integer literal, usable wherever a `uint` or `bytesN` is
    IntLiteral,
}

impl Ty {
    fn of(ty: &TypeName) -> Option<Self> {
        match ty {
            TypeName::Elementary(ElementaryType::Uint(_)) => Some(Self::Uint),
            TypeName::Elementary(ElementaryType::Bool) => Some(Self::Bool),
            TypeName::Elementary(ElementaryType::Address) => Some(Self::Address),
            TypeName::Elementary(ElementaryType::Bytes(_)) | TypeName::Proof => Some(Self::Bytes),
            TypeName::Secret(inner) => Self::of(inner),
            TypeName::Mapping { .. } | TypeName::Array(_) => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Uint => "uint",
            Self::Bool => "bool",
            Self::Address => "address",
            Self::Bytes => "bytes",
            Self::IntLiteral => "integer literal",
        }
    }

    /// Whether a value of type `found` may be used where `self` is expected
    fn accepts(self, found: Ty) -> bool {
        self == found
            || (found == Self::IntLiteral && matches!(self, Self::Uint | Self::Bytes))
            || (self == Self::IntLiteral && matches!(found, Self::Uint | Self::Bytes))
    }

    fn is_numeric(self) -> bool {
        matches!(self, Self::Uint | Self::IntLiteral)
    }
}

/// What a name resolves to inside an ordinary function
enum Resolved<'a> {
    Local(&'a TypeName),
    State(&'a TypeName),
    Mapping(&'a MappingDecl),
}

struct FunctionChecker<'a> {
    contract: &'a ContractDecl,
    function: &'a FunctionDecl,
    state: HashMap<&'a str, &'a Item>,
    scopes: Vec<HashMap<&'a str, &'a TypeName>>,
    errors: Vec<SemanticError>,
}

impl<'a> FunctionChecker<'a> {
    fn new(contract: &'a ContractDecl, function: &'a FunctionDecl) -> Self {
        let state = contract
            .items
            .iter()
            .filter(|item| matches!(item, Item::StateVar(_) | Item::Mapping(_)))
            .map(|item| (item.name().name.as_str(), item))
            .collect();
        let params =
            function.params.iter().map(|p| (p.name.name.as_str(), &p.ty)).collect::<HashMap<_, _>>();
        Self { contract, function, state, scopes: vec![params], errors: Vec::new() }
    }

    fn run(mut self) -> std::result::Result<(), Vec<SemanticError>> {
        self.check_circuit_binding();
        let function = self.function;
        self.block(&function.body);
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    fn error(&mut self, error: SemanticError) {
        self.errors.push(error);
    }

    /// Reports `found` unless it is unknown or fits `expected`
    fn expect(&mut self, expected: Ty, found: Option<Ty>, position: Position) {
        if let Some(found) = found {
            if !expected.accepts(found) {
                self.error(SemanticError::TypeMismatch {
                    expected: expected.name().to_string(),
                    found: found.name().to_string(),
                    position,
                });
            }
        }
    }

    fn expect_declared(&mut self, declared: &TypeName, found: Option<Ty>, position: Position) {
        if let Some(expected) = Ty::of(declared) {
            self.expect(expected, found, position);
        }
    }

    fn expect_numeric(&mut self, found: Option<Ty>, position: Position) {
        if found.is_some_and(|ty| !ty.is_numeric()) {
            self.expect(Ty::Uint, found, position);
        }
    }

    fn check_circuit_binding(&mut self) {
        let (contract, function) = (self.contract, self.function);
        let Some(circuit_name) = &function.circuit else {
            return;
        };
        let Some(circuit) = contract.circuit(&circuit_name.name) else {
            self.error(SemanticError::UnknownCircuit {
                name: circuit_name.name.clone(),
                position: circuit_name.position,
            });
            return;
        };

        for signal in circuit.signals.iter().filter(|s| s.kind != SignalKind::Witness) {
            if !function.params.iter().any(|p| p.name.name == signal.name.name) {
                self.error(SemanticError::UnboundPublicSignal {
                    signal: signal.name.name.clone(),
                    circuit: circuit.name.name.clone(),
                    position: circuit_name.position,
                });
            }
        }

        let proofs = function.params.iter().filter(|p| p.ty == TypeName::Proof).count();
        if proofs != 1 {
            self.error(SemanticError::MissingProof {
                function: function.name.name.clone(),
                position: function.position,
            });
        }
    }

    fn mutability_violation(&mut self, action: &str, position: Position) {
        if let Some(mutability) = self.function.mutability {
            self.error(SemanticError::MutabilityViolation {
                function: self.function.name.name.clone(),
                mutability: mutability.as_str().to_string(),
                action: action.to_string(),
                position,
            });
        }
    }

    fn resolve(&self, name: &str) -> Option<Resolved<'a>> {
        if let Some(ty) = self.scopes.iter().rev().find_map(|scope| scope.get(name)) {
            return Some(Resolved::Local(ty));
        }
        match *self.state.get(name)? {
            Item::Mapping(m) => Some(Resolved::Mapping(m)),
            Item::StateVar(v) => Some(Resolved::State(&v.ty)),
            _ => None,
        }
    }

    fn block(&mut self, block: &'a Block) {
        self.scopes.push(HashMap::new());
        for stmt in block {
            self.stmt(stmt);
        }
        self.scopes.pop();
    }

    fn condition(&mut self, condition: &'a Expr) {
        let ty = self.value(condition);
        self.expect(Ty::Bool, ty, condition.position);
    }

    fn stmt(&mut self, stmt: &'a Stmt) {
        match &stmt.kind {
            StmtKind::Require { condition, .. } => self.condition(condition),
            StmtKind::Assign { target, value } => {
                let found = self.value(value);
                if let Some(expected) = self.assign_target(target) {
                    self.expect(expected, found, value.position);
                }
            }
            StmtKind::VarDecl { ty, name, value } => {
                if let Some(value) = value {
                    let found = self.value(value);
                    self.expect_declared(ty, found, value.position);
                }
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.name.as_str(), ty);
                }
            }
            StmtKind::If { condition, then_block, else_block } => {
                self.condition(condition);
                self.block(then_block);
                if let Some(else_block) = else_block {
                    self.block(else_block);
                }
            }
            StmtKind::For { init, condition, step, body } => {
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.stmt(init);
                }
                if let Some(condition) = condition {
                    self.condition(condition);
                }
                self.block(body);
                if let Some(step) = step {
                    self.stmt(step);
                }
                self.scopes.pop();
            }
            StmtKind::Return(values) => {
                let function = self.function;
                let expected = function.returns.len();
                if values.len() != expected {
                    self.error(SemanticError::ArityMismatch {
                        what: format!("return from `{}`", function.name.name),
                        expected,
                        found: values.len(),
                        position: stmt.position,
                    });
                    values.iter().for_each(|v| {
                        self.value(v);
                    });
                } else {
                    for (value, declared) in values.iter().zip(&function.returns) {
                        let found = self.value(value);
                        self.expect_declared(declared, found, value.position);
                    }
                }
            }
            StmtKind::Emit { event, args } => {
                self.mutability_violation("emit events", stmt.position);
                let contract = self.contract;
                let params = match contract.event(&event.name) {
                    Some(decl) if decl.params.len() != args.len() => {
                        self.error(SemanticError::ArityMismatch {
                            what: format!("event `{}`", event.name),
                            expected: decl.params.len(),
                            found: args.len(),
                            position: event.position,
                        });
                        None
                    }
                    Some(decl) => Some(&decl.params),
                    None => {
                        self.error(SemanticError::UnknownEvent {
                            name: event.name.clone(),
                            position: event.position,
                        });
                        None
                    }
                };
                for (i, arg) in args.iter().enumerate() {
                    let found = self.value(arg);
                    if let Some(param) = params.and_then(|params| params.get(i)) {
                        self.expect_declared(&param.ty, found, arg.position);
                    }
                }
            }
            StmtKind::Expr(expr) => match &expr.kind {
                // a discarded call may return any number of values
                ExprKind::Call { callee, args } => {
                    self.call(callee, args, true);
                }
                _ => {
                    self.value(expr);
                }
            },
        }
    }

    /// Checks an assignment target and returns the type it stores
    fn assign_target(&mut self, target: &'a Expr) -> Option<Ty> {
        match &target.kind {
            ExprKind::Ident(name) => match self.resolve(name) {
                Some(Resolved::Local(ty)) => Ty::of(ty),
                Some(Resolved::State(ty)) => {
                    self.mutability_violation("write state", target.position);
                    Ty::of(ty)
                }
                Some(Resolved::Mapping(_)) => {
                    self.error(SemanticError::InvalidMappingAccess {
                        name: name.clone(),
                        position: target.position,
                    });
                    None
                }
                None => {
                    self.error(SemanticError::UnknownIdentifier {
                        name: name.clone(),
                        position: target.position,
                    });
                    None
                }
            },
            ExprKind::Index { .. } => {
                let ty = self.index(target);
                if let Some((root, _)) = target.index_chain() {
                    if matches!(self.resolve(root), Some(Resolved::Mapping(_))) {
                        self.mutability_violation("write state", target.position);
                    }
                }
                ty
            }
            _ => {
                self.error(SemanticError::InvalidAssignmentTarget { position: target.position });
                None
            }
        }
    }

    /// Checks an expression used as a single value and infers its type
    fn value(&mut self, expr: &'a Expr) -> Option<Ty> {
        match &expr.kind {
            ExprKind::Literal(literal) => match literal {
                Literal::Number(_) => Some(Ty::IntLiteral),
                Literal::Bool(_) => Some(Ty::Bool),
                Literal::Address(_) => Some(Ty::Address),
                Literal::HexBytes(_) => Some(Ty::Bytes),
                Literal::Str(_) => None,
            },
            ExprKind::Ident(name) => match self.resolve(name) {
                Some(Resolved::Local(ty)) => Ty::of(ty),
                Some(Resolved::State(ty)) => {
                    if self.function.mutability == Some(Mutability::Pure) {
                        self.mutability_violation("read state", expr.position);
                    }
                    Ty::of(ty)
                }
                Some(Resolved::Mapping(_)) => {
                    self.error(SemanticError::InvalidMappingAccess {
                        name: name.clone(),
                        position: expr.position,
                    });
                    None
                }
                None => {
                    self.error(SemanticError::UnknownIdentifier {
                        name: name.clone(),
                        position: expr.position,
                    });
                    None
                }
            },
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            ExprKind::Unary { op, operand } => {
                let ty = self.value(operand);
                match op {
                    UnaryOp::Not => {
                        self.expect(Ty::Bool, ty, operand.position);
                        Some(Ty::Bool)
                    }
                    UnaryOp::Neg => {
                        self.expect_numeric(ty, operand.position);
                        ty.map(|ty| if ty == Ty::IntLiteral { Ty::IntLiteral } else { Ty::Uint })
                    }
                }
            }
            ExprKind::Call { callee, args } => {
                let target = self.call(callee, args, false)?;
                match target.returns.as_slice() {
                    [] => {
                        self.error(SemanticError::ArityMismatch {
                            what: format!("value of `{}`", callee.name),
                            expected: 1,
                            found: 0,
                            position: expr.position,
                        });
                        None
                    }
                    [single] => Ty::of(single),
                    _ => None,
                }
            }
            ExprKind::Member { object, member } => {
                if let Some(builtin) = expr.as_builtin() {
                    if self.function.mutability == Some(Mutability::Pure) {
                        self.mutability_violation("read the environment", expr.position);
                    }
                    Some(match builtin {
                        Builtin::MsgSender => Ty::Address,
                        Builtin::MsgValue | Builtin::BlockTimestamp | Builtin::BlockNumber => Ty::Uint,
                    })
                } else if member.name == "length"
                    && object.as_ident().is_some_and(|n| matches!(self.resolve(n), Some(Resolved::Local(_))))
                {
                    Some(Ty::Uint)
                } else {
                    let name = match object.as_ident() {
                        Some(object) => format!("{object}.{}", member.name),
                        None => member.name.clone(),
                    };
                    self.error(SemanticError::UnknownIdentifier { name, position: expr.position });
                    None
                }
            }
            ExprKind::Index { .. } => self.index(expr),
            ExprKind::Array(elements) => {
                elements.iter().for_each(|e| {
                    self.value(e);
                });
                None
            }
            ExprKind::Reveal(inner) => {
                self.error(SemanticError::RevealOutsideMpc { position: expr.position });
                self.value(inner);
                None
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &'a Expr, rhs: &'a Expr) -> Option<Ty> {
        let l = self.value(lhs);
        let r = self.value(rhs);
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                self.expect_numeric(l, lhs.position);
                self.expect_numeric(r, rhs.position);
                match (l?, r?) {
                    (Ty::IntLiteral, Ty::IntLiteral) => Some(Ty::IntLiteral),
                    _ => Some(Ty::Uint),
                }
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                self.expect_numeric(l, lhs.position);
                self.expect_numeric(r, rhs.position);
                Some(Ty::Bool)
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                if let Some(l) = l {
                    self.expect(l, r, rhs.position);
                }
                Some(Ty::Bool)
            }
            BinaryOp::And | BinaryOp::Or => {
                self.expect(Ty::Bool, l, lhs.position);
                self.expect(Ty::Bool, r, rhs.position);
                Some(Ty::Bool)
            }
        }
    }

    /// Checks `name[k1][k2]...` and returns the type of the element reached
    fn index(&mut self, expr: &'a Expr) -> Option<Ty> {
        let Some((root, keys)) = expr.index_chain() else {
            if let ExprKind::Index { base, index } = &expr.kind {
                self.value(base);
                let ty = self.value(index);
                self.expect_numeric(ty, index.position);
            }
            return None;
        };
        let key_types: Vec<Option<Ty>> = keys.iter().map(|key| self.value(key)).collect();

        match self.resolve(root) {
            Some(Resolved::Mapping(mapping)) => {
                let partial = keys.len() != mapping.depth();
                if partial {
                    self.error(SemanticError::InvalidMappingAccess {
                        name: root.to_string(),
                        position: expr.position,
                    });
                }
                if self.function.mutability == Some(Mutability::Pure) {
                    self.mutability_violation("read state", expr.position);
                }
                if partial {
                    return None;
                }
                for ((declared, key), found) in mapping.keys().into_iter().zip(&keys).zip(key_types) {
                    self.expect_declared(declared, found, key.position);
                }
                Ty::of(mapping.value_type())
            }
            Some(Resolved::Local(mut ty)) => {
                for (key, found) in keys.iter().zip(key_types) {
                    self.expect_numeric(found, key.position);
                    ty = ty.element()?;
                }
                Ty::of(ty)
            }
            Some(Resolved::State(_)) => {
                self.error(SemanticError::InvalidMappingAccess {
                    name: root.to_string(),
                    position: expr.position,
                });
                None
            }
            None => {
                self.error(SemanticError::UnknownIdentifier {
                    name: root.to_string(),
                    position: expr.position,
                });
                None
            }
        }
    }

    /// Checks a call and returns the callee when it resolves
    fn call(&mut self, callee: &'a Ident, args: &'a [Expr], discarded: bool) -> Option<&'a FunctionDecl> {
        let found: Vec<Option<Ty>> = args.iter().map(|a| self.value(a)).collect();

        let contract = self.contract;
        let Some(target) = contract.function(&callee.name) else {
            self.error(SemanticError::UnknownFunction {
                name: callee.name.clone(),
                position: callee.position,
            });
            return None;
        };

        if target.params.len() != args.len() {
            self.error(SemanticError::ArityMismatch {
                what: format!("call to `{}`", callee.name),
                expected: target.params.len(),
                found: args.len(),
                position: callee.position,
            });
        } else {
            for ((param, arg), ty) in target.params.iter().zip(args).zip(found) {
                self.expect_declared(&param.ty, ty, arg.position);
            }
        }
        if !discarded && target.returns.len() > 1 {
            self.error(SemanticError::MultiValueCall {
                name: callee.name.clone(),
                position: callee.position,
            });
        }

        let allowed = match (self.function.mutability, target.mutability) {
            (None, _) | (Some(Mutability::View), Some(_)) => true,
            (Some(Mutability::Pure), Some(Mutability::Pure)) => true,
            _ => false,
        };
        if !allowed {
            let action = format!("call `{}`", callee.name);
            self.mutability_violation(&action, callee.position);
        }
        Some(target)
    }
}
