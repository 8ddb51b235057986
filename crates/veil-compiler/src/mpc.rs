//! Lowering of `mpc function` bodies to MPC descriptors
//!
//! The body is flattened to three-address operations. Secret values may flow
//! through arithmetic and into secret locals; every other use has to go
//! through `reveal`, and each `reveal` site gets a point number in source
//! order that backends and MPC parties must respect.

use std::collections::{HashMap, HashSet};

use alloy_primitives::U256;
use tracing::{debug, instrument};
use veil_runtime::{ArithOp, LogicOp, MpcDescriptor, MpcInput, MpcOp, MpcOperand};

use crate::ast::{
    BinaryOp, Block, ContractDecl, Expr, ExprKind, Item, Literal, MpcFunctionDecl, Param, Stmt,
    StmtKind, TypeName, UnaryOp,
};
use crate::error::SemanticError;
use crate::token::Position;

#[instrument(level = "debug", skip_all, fields(function = %function.name.name))]
pub fn compile_mpc(
    function: &MpcFunctionDecl,
    contract: &ContractDecl,
) -> Result<MpcDescriptor, Vec<SemanticError>> {
    let state: HashSet<&str> = contract
        .items
        .iter()
        .filter(|item| matches!(item, Item::StateVar(_) | Item::Mapping(_)))
        .map(|item| item.name().name.as_str())
        .collect();
    let callables: HashSet<&str> = contract
        .items
        .iter()
        .filter(|item| matches!(item, Item::Function(_) | Item::MpcFunction(_)))
        .map(|item| item.name().name.as_str())
        .collect();

    let mut lowering = MpcLowering {
        function,
        state,
        callables,
        scopes: vec![HashMap::new()],
        next_temp: 0,
        next_point: 0,
        errors: Vec::new(),
    };
    for param in function.secret_params.iter().chain(&function.plain_params) {
        lowering.declare(&param.name.name, &param.ty);
    }

    let mut operations = Vec::new();
    lowering.block(&function.body, &mut operations);

    if !lowering.errors.is_empty() {
        return Err(lowering.errors);
    }

    let descriptor = MpcDescriptor {
        name: function.name.name.clone(),
        secret_inputs: function.secret_params.iter().map(input).collect(),
        public_inputs: function.plain_params.iter().map(input).collect(),
        operations,
        outputs: function.returns.iter().map(TypeName::canonical).collect(),
        reveal_sites: lowering.next_point,
    };
    debug!(
        operations = descriptor.operations.len(),
        reveal_sites = descriptor.reveal_sites,
        "built mpc descriptor"
    );
    Ok(descriptor)
}

fn input(param: &Param) -> MpcInput {
    let ty = param.ty.element().unwrap_or(&param.ty).canonical();
    MpcInput { name: param.name.name.clone(), ty, is_array: param.ty.is_array() }
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    secret: bool,
    array: bool,
}

/// Lowered value and whether it is secret-shared
struct Value {
    operand: MpcOperand,
    secret: bool,
}

struct MpcLowering<'a> {
    function: &'a MpcFunctionDecl,
    state: HashSet<&'a str>,
    callables: HashSet<&'a str>,
    scopes: Vec<HashMap<String, Binding>>,
    next_temp: u32,
    next_point: u32,
    errors: Vec<SemanticError>,
}

impl MpcLowering<'_> {
    fn declare(&mut self, name: &str, ty: &TypeName) {
        let binding = Binding { secret: ty.is_secret(), array: ty.is_array() };
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn temp(&mut self) -> u32 {
        let temp = self.next_temp;
        self.next_temp += 1;
        temp
    }

    fn leak(&mut self, detail: impl Into<String>, position: Position) {
        self.errors.push(SemanticError::SecretLeak { detail: detail.into(), position });
    }

    fn unsupported(&mut self, construct: impl Into<String>, position: Position) {
        self.errors.push(SemanticError::UnsupportedInMpc { construct: construct.into(), position });
    }

    fn block(&mut self, block: &Block, ops: &mut Vec<MpcOp>) {
        self.scopes.push(HashMap::new());
        for stmt in block {
            self.stmt(stmt, ops);
        }
        self.scopes.pop();
    }

    /// Lowers a condition that must stay public
    fn condition(&mut self, expr: &Expr, what: &str, ops: &mut Vec<MpcOp>) -> MpcOperand {
        let value = self.expr(expr, ops);
        if value.secret {
            self.leak(format!("{what} depends on a secret value; reveal it first"), expr.position);
        }
        value.operand
    }

    fn stmt(&mut self, stmt: &Stmt, ops: &mut Vec<MpcOp>) {
        match &stmt.kind {
            StmtKind::VarDecl { ty, name, value } => {
                if !ty.is_word() {
                    self.unsupported(format!("local of type `{}`", ty.canonical()), stmt.position);
                }
                let secret = ty.is_secret();
                let value = match value {
                    Some(expr) => {
                        let value = self.expr(expr, ops);
                        if value.secret && !secret {
                            self.leak(
                                format!("secret value stored in non-secret local `{}`", name.name),
                                expr.position,
                            );
                        }
                        value.operand
                    }
                    None => MpcOperand::Const(U256::ZERO),
                };
                self.declare(&name.name, ty);
                ops.push(MpcOp::Assign { var: name.name.clone(), value, secret });
            }
            StmtKind::Assign { target, value } => self.assign(target, value, ops),
            StmtKind::If { condition, then_block, else_block } => {
                let condition = self.condition(condition, "branch condition", ops);
                let mut then_ops = Vec::new();
                self.block(then_block, &mut then_ops);
                let mut else_ops = Vec::new();
                if let Some(else_block) = else_block {
                    self.block(else_block, &mut else_ops);
                }
                ops.push(MpcOp::Branch { condition, then_ops, else_ops });
            }
            StmtKind::For { init, condition, step, body } => {
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.stmt(init, ops);
                }
                let mut condition_ops = Vec::new();
                let condition = match condition {
                    Some(expr) => self.condition(expr, "loop condition", &mut condition_ops),
                    None => MpcOperand::Const(U256::from(1)),
                };
                let mut body_ops = Vec::new();
                self.block(body, &mut body_ops);
                if let Some(step) = step {
                    self.stmt(step, &mut body_ops);
                }
                self.scopes.pop();
                ops.push(MpcOp::Loop { condition_ops, condition, body: body_ops });
            }
            StmtKind::Require { condition, .. } => {
                let condition = self.condition(condition, "require condition", ops);
                ops.push(MpcOp::Require { condition });
            }
            StmtKind::Return(values) => {
                let expected = self.function.returns.len();
                if values.len() != expected {
                    self.errors.push(SemanticError::ArityMismatch {
                        what: format!("return from `{}`", self.function.name.name),
                        expected,
                        found: values.len(),
                        position: stmt.position,
                    });
                }
                let mut operands = Vec::with_capacity(values.len());
                for expr in values {
                    let value = self.expr(expr, ops);
                    if value.secret {
                        self.leak("secret value returned without reveal", expr.position);
                    }
                    operands.push(value.operand);
                }
                ops.push(MpcOp::Output { values: operands });
            }
            StmtKind::Emit { args, .. } => {
                for expr in args {
                    if self.expr(expr, ops).secret {
                        self.leak("secret value emitted in an event", expr.position);
                    }
                }
                self.unsupported("event emission", stmt.position);
            }
            StmtKind::Expr(expr) => {
                self.expr(expr, ops);
            }
        }
    }

    fn assign(&mut self, target: &Expr, value: &Expr, ops: &mut Vec<MpcOp>) {
        let lowered = self.expr(value, ops);
        match &target.kind {
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(binding) if binding.array => {
                    self.unsupported("assignment to a whole array", target.position)
                }
                Some(binding) => {
                    if lowered.secret && !binding.secret {
                        self.leak(
                            format!("secret value assigned to non-secret `{name}`"),
                            value.position,
                        );
                    }
                    ops.push(MpcOp::Assign {
                        var: name.clone(),
                        value: lowered.operand,
                        secret: binding.secret,
                    });
                }
                None if self.state.contains(name.as_str()) => {
                    if lowered.secret {
                        self.leak(format!("secret value written to state `{name}`"), value.position);
                    }
                    self.unsupported("state write", target.position);
                }
                None => self.errors.push(SemanticError::UnknownIdentifier {
                    name: name.clone(),
                    position: target.position,
                }),
            },
            ExprKind::Index { .. } => {
                if let Some((root, _)) = target.index_chain() {
                    if self.lookup(root).is_none() && self.state.contains(root) {
                        if lowered.secret {
                            self.leak(
                                format!("secret value written to state `{root}`"),
                                value.position,
                            );
                        }
                        self.unsupported("state write", target.position);
                        return;
                    }
                }
                self.unsupported("array element assignment", target.position);
            }
            _ => self.errors.push(SemanticError::InvalidAssignmentTarget { position: target.position }),
        }
    }

    fn expr(&mut self, expr: &Expr, ops: &mut Vec<MpcOp>) -> Value {
        let public = |operand| Value { operand, secret: false };
        match &expr.kind {
            ExprKind::Literal(Literal::Number(value)) => public(MpcOperand::Const(*value)),
            ExprKind::Literal(Literal::Bool(value)) => {
                public(MpcOperand::Const(U256::from(u8::from(*value))))
            }
            ExprKind::Literal(_) => {
                self.unsupported("non-numeric literal", expr.position);
                public(MpcOperand::Const(U256::ZERO))
            }
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(binding) => {
                    if binding.array {
                        self.unsupported(format!("array `{name}` used as a value"), expr.position);
                    }
                    Value { operand: MpcOperand::Var(name.clone()), secret: binding.secret }
                }
                None => {
                    if self.state.contains(name.as_str()) {
                        self.unsupported(format!("state read of `{name}`"), expr.position);
                    } else {
                        self.errors.push(SemanticError::UnknownIdentifier {
                            name: name.clone(),
                            position: expr.position,
                        });
                    }
                    public(MpcOperand::Const(U256::ZERO))
                }
            },
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.expr(lhs, ops);
                let r = self.expr(rhs, ops);
                let dst = self.temp();
                match lower_op(*op) {
                    Lowered::Arith(arith) => {
                        let secret = l.secret || r.secret;
                        ops.push(MpcOp::Arith { dst, op: arith, lhs: l.operand, rhs: r.operand, secret });
                        Value { operand: MpcOperand::Temp(dst), secret }
                    }
                    Lowered::Logic(logic) => {
                        if l.secret || r.secret {
                            self.leak(
                                format!("`{}` applied to a secret value without reveal", op.symbol()),
                                expr.position,
                            );
                        }
                        ops.push(MpcOp::Logic { dst, op: logic, lhs: l.operand, rhs: r.operand });
                        public(MpcOperand::Temp(dst))
                    }
                }
            }
            ExprKind::Unary { op: UnaryOp::Neg, operand } => {
                let value = self.expr(operand, ops);
                let dst = self.temp();
                ops.push(MpcOp::Arith {
                    dst,
                    op: ArithOp::Sub,
                    lhs: MpcOperand::Const(U256::ZERO),
                    rhs: value.operand,
                    secret: value.secret,
                });
                Value { operand: MpcOperand::Temp(dst), secret: value.secret }
            }
            ExprKind::Unary { op: UnaryOp::Not, operand } => {
                let value = self.expr(operand, ops);
                if value.secret {
                    self.leak("`!` applied to a secret value without reveal", expr.position);
                }
                let dst = self.temp();
                ops.push(MpcOp::Not { dst, operand: value.operand });
                public(MpcOperand::Temp(dst))
            }
            ExprKind::Index { base, index } => {
                let index_value = self.expr(index, ops);
                if index_value.secret {
                    self.leak("array indexed by a secret value", index.position);
                }
                let Some(name) = base.as_ident() else {
                    self.unsupported("indexing a computed value", base.position);
                    return public(MpcOperand::Const(U256::ZERO));
                };
                match self.lookup(name) {
                    Some(binding) if binding.array => {
                        let dst = self.temp();
                        ops.push(MpcOp::Element {
                            dst,
                            array: name.to_string(),
                            index: index_value.operand,
                            secret: binding.secret,
                        });
                        Value { operand: MpcOperand::Temp(dst), secret: binding.secret }
                    }
                    Some(_) => {
                        self.unsupported(format!("indexing non-array `{name}`"), base.position);
                        public(MpcOperand::Const(U256::ZERO))
                    }
                    None if self.state.contains(name) => {
                        self.unsupported(format!("state read of `{name}`"), base.position);
                        public(MpcOperand::Const(U256::ZERO))
                    }
                    None => {
                        self.errors.push(SemanticError::UnknownIdentifier {
                            name: name.to_string(),
                            position: base.position,
                        });
                        public(MpcOperand::Const(U256::ZERO))
                    }
                }
            }
            ExprKind::Member { object, member } => {
                let array = object
                    .as_ident()
                    .filter(|name| self.lookup(name).is_some_and(|b| b.array));
                match array {
                    Some(name) if member.name == "length" => {
                        let dst = self.temp();
                        ops.push(MpcOp::Length { dst, array: name.to_string() });
                        public(MpcOperand::Temp(dst))
                    }
                    _ => {
                        self.unsupported(format!("member access `.{}`", member.name), expr.position);
                        public(MpcOperand::Const(U256::ZERO))
                    }
                }
            }
            ExprKind::Call { callee, args } => {
                for arg in args {
                    if self.expr(arg, ops).secret {
                        self.leak(
                            format!("secret value passed to `{}`", callee.name),
                            arg.position,
                        );
                    }
                }
                if self.callables.contains(callee.name.as_str()) {
                    self.unsupported(format!("call to `{}`", callee.name), expr.position);
                } else {
                    self.errors.push(SemanticError::UnknownFunction {
                        name: callee.name.clone(),
                        position: callee.position,
                    });
                }
                public(MpcOperand::Const(U256::ZERO))
            }
            ExprKind::Array(_) => {
                self.unsupported("array literal", expr.position);
                public(MpcOperand::Const(U256::ZERO))
            }
            ExprKind::Reveal(inner) => {
                let value = self.expr(inner, ops);
                let dst = self.temp();
                let point = self.next_point;
                self.next_point += 1;
                ops.push(MpcOp::Reveal { dst, value: value.operand, point });
                public(MpcOperand::Temp(dst))
            }
        }
    }
}

/// How a source operator is evaluated by the computing parties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lowered {
    Arith(ArithOp),
    Logic(LogicOp),
}

fn lower_op(op: BinaryOp) -> Lowered {
    match op {
        BinaryOp::Add => Lowered::Arith(ArithOp::Add),
        BinaryOp::Sub => Lowered::Arith(ArithOp::Sub),
        BinaryOp::Mul => Lowered::Arith(ArithOp::Mul),
        BinaryOp::Div => Lowered::Arith(ArithOp::Div),
        BinaryOp::Mod => Lowered::Arith(ArithOp::Mod),
        BinaryOp::Eq => Lowered::Logic(LogicOp::Eq),
        BinaryOp::Ne => Lowered::Logic(LogicOp::Ne),
        BinaryOp::Lt => Lowered::Logic(LogicOp::Lt),
        BinaryOp::Le => Lowered::Logic(LogicOp::Le),
        BinaryOp::Gt => Lowered::Logic(LogicOp::Gt),
        BinaryOp::Ge => Lowered::Logic(LogicOp::Ge),
        BinaryOp::And => Lowered::Logic(LogicOp::And),
        BinaryOp::Or => Lowered::Logic(LogicOp::Or),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;

    fn compile(source: &str) -> Result<MpcDescriptor, Vec<SemanticError>> {
        let contract = parse_tokens(&tokenize(source).unwrap()).unwrap();
        let function = contract.mpc_functions().next().unwrap();
        compile_mpc(function, &contract)
    }

    #[test]
    fn test_secret_arithmetic_stays_secret() {
        let descriptor = compile(
            "contract C { mpc function f(secret<uint256> a, secret<uint256> b) -> uint256 {
                secret<uint256> s = a + b;
                return reveal(s);
            } }",
        )
        .unwrap();
        assert!(descriptor
            .operations
            .iter()
            .any(|op| matches!(op, MpcOp::Arith { op: ArithOp::Add, secret: true, .. })));
        assert_eq!(descriptor.reveal_sites, 1);
    }

    #[test]
    fn test_comparison_on_secret_leaks() {
        let errors = compile(
            "contract C { mpc function f(secret<uint256> a) -> bool { return a > 3; } }",
        )
        .unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, SemanticError::SecretLeak { .. })));
    }

    #[test]
    fn test_state_access_is_unsupported() {
        let errors = compile(
            "contract C { uint256 total; mpc function f(secret<uint256> a) { total = 1; } }",
        )
        .unwrap_err();
        assert!(matches!(errors[0], SemanticError::UnsupportedInMpc { .. }));
    }

    #[test]
    fn test_array_inputs_keep_element_type() {
        let descriptor = compile(
            "contract C { mpc function f(secret<uint64>[] xs, uint256 n) -> uint256 {
                return reveal(xs[0]) + n;
            } }",
        )
        .unwrap();
        assert_eq!(descriptor.secret_inputs[0].ty, "uint64");
        assert!(descriptor.secret_inputs[0].is_array);
        assert_eq!(descriptor.public_inputs[0].name, "n");
    }

    #[test]
    fn test_operators_lower_to_matching_ops() {
        assert_eq!(lower_op(BinaryOp::Add), Lowered::Arith(ArithOp::Add));
        assert_eq!(lower_op(BinaryOp::Mod), Lowered::Arith(ArithOp::Mod));
        assert_eq!(lower_op(BinaryOp::Ge), Lowered::Logic(LogicOp::Ge));
        assert_eq!(lower_op(BinaryOp::And), Lowered::Logic(LogicOp::And));
        assert_eq!(lower_op(BinaryOp::Or), Lowered::Logic(LogicOp::Or));
    }

    #[test]
    fn test_disjunction_of_public_values() {
        let descriptor = compile(
            "contract C { mpc function f(secret<uint256> s, uint256 a, uint256 b) -> (uint256, bool) {
                return (reveal(s), a > 1 || b > 2);
            } }",
        )
        .unwrap();
        let logic: Vec<LogicOp> = descriptor
            .operations
            .iter()
            .filter_map(|op| match op {
                MpcOp::Logic { op, .. } => Some(*op),
                _ => None,
            })
            .collect();
        assert_eq!(logic, vec![LogicOp::Gt, LogicOp::Gt, LogicOp::Or]);
        assert!(!descriptor.operations.iter().any(|op| matches!(op, MpcOp::Arith { .. })));
    }
}
