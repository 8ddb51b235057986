//! Lowering of `circuit` blocks to constraint systems
//!
//! Signals are numbered in declaration order. Each `constraint` expression
//! becomes one or more [`Constraint`]s over polynomials of degree at most 2;
//! named hash and signature calls become [`Constraint::Predicate`]s.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use alloy_primitives::U256;
use tracing::{debug, instrument};
use veil_runtime::{
    Comparison, Constraint, ConstraintSystem, Operand, Polynomial, Predicate, SignalKind, Term,
    Variable,
};

use crate::ast::{BinaryOp, CircuitDecl, Expr, ExprKind, Literal, UnaryOp};
use crate::error::SemanticError;
use crate::token::Position;

/// Builds the constraint system of one circuit, or every violation found in it
#[instrument(level = "debug", skip_all, fields(circuit = %circuit.name.name))]
pub fn compile_circuit(circuit: &CircuitDecl) -> Result<ConstraintSystem, Vec<SemanticError>> {
    let mut compiler = CircuitCompiler::new(circuit);
    let mut constraints = Vec::new();
    let mut referenced = BTreeSet::new();

    for expr in &circuit.constraints {
        let errors_before = compiler.errors.len();
        let start = constraints.len();
        compiler.relation(expr, &mut constraints);

        if compiler.errors.len() > errors_before {
            // A rejected constraint still mentions its signals; reporting them
            // as unconstrained as well would only add noise.
            compiler.collect_idents(expr, &mut referenced);
        }
        for constraint in &constraints[start..] {
            referenced.extend(constraint.variables());
        }
    }

    for (index, signal) in circuit.signals.iter().enumerate() {
        if signal.kind == SignalKind::Witness && !referenced.contains(&index) {
            compiler.errors.push(SemanticError::UnconstrainedWitness {
                name: signal.name.name.clone(),
                position: signal.name.position,
            });
        }
    }

    if !compiler.errors.is_empty() {
        return Err(compiler.errors);
    }

    let indices_of = |kind: SignalKind| -> Vec<usize> {
        circuit.signals.iter().enumerate().filter(|(_, s)| s.kind == kind).map(|(i, _)| i).collect()
    };
    let system = ConstraintSystem {
        name: circuit.name.name.clone(),
        variables: circuit
            .signals
            .iter()
            .enumerate()
            .map(|(index, s)| Variable { index, name: s.name.name.clone(), kind: s.kind })
            .collect(),
        constraints,
        public_inputs: indices_of(SignalKind::Input),
        public_outputs: indices_of(SignalKind::Output),
    };
    debug!(
        signals = system.variables.len(),
        constraints = system.constraints.len(),
        "built constraint system"
    );
    Ok(system)
}

/// Polynomial under construction, keyed by sorted variable lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Poly(BTreeMap<Vec<usize>, i128>);

impl Poly {
    fn constant(value: i128) -> Self {
        let mut poly = Self::default();
        poly.add_term(Vec::new(), value);
        poly
    }

    fn variable(index: usize) -> Self {
        let mut poly = Self::default();
        poly.add_term(vec![index], 1);
        poly
    }

    fn add_term(&mut self, mut vars: Vec<usize>, coefficient: i128) -> Option<()> {
        vars.sort_unstable();
        let entry = self.0.entry(vars).or_insert(0);
        *entry = entry.checked_add(coefficient)?;
        self.0.retain(|_, c| *c != 0);
        Some(())
    }

    fn add(&self, other: &Self) -> Option<Self> {
        let mut sum = self.clone();
        for (vars, coefficient) in &other.0 {
            sum.add_term(vars.clone(), *coefficient)?;
        }
        Some(sum)
    }

    fn neg(&self) -> Option<Self> {
        let mut negated = Self::default();
        for (vars, coefficient) in &self.0 {
            negated.add_term(vars.clone(), coefficient.checked_neg()?)?;
        }
        Some(negated)
    }

    fn sub(&self, other: &Self) -> Option<Self> {
        self.add(&other.neg()?)
    }

    fn mul(&self, other: &Self) -> Option<Self> {
        let mut product = Self::default();
        for (lv, lc) in &self.0 {
            for (rv, rc) in &other.0 {
                let vars = lv.iter().chain(rv).copied().collect();
                product.add_term(vars, lc.checked_mul(*rc)?)?;
            }
        }
        Some(product)
    }

    fn degree(&self) -> usize {
        self.0.keys().map(Vec::len).max().unwrap_or(0)
    }

    fn into_polynomial(self) -> Polynomial {
        Polynomial {
            terms: self
                .0
                .into_iter()
                .map(|(variables, coefficient)| Term { coefficient, variables })
                .collect(),
        }
    }
}

/// `lhs op rhs` with `op` in {<, <=}
struct Inequality {
    lhs: Poly,
    op: Comparison,
    rhs: Poly,
}

struct CircuitCompiler<'c> {
    indices: HashMap<&'c str, usize>,
    errors: Vec<SemanticError>,
}

impl<'c> CircuitCompiler<'c> {
    fn new(circuit: &'c CircuitDecl) -> Self {
        let indices =
            circuit.signals.iter().enumerate().map(|(i, s)| (s.name.name.as_str(), i)).collect();
        Self { indices, errors: Vec::new() }
    }

    fn unsupported(reason: impl Into<String>, position: Position) -> SemanticError {
        SemanticError::UnsupportedConstraint { reason: reason.into(), position }
    }

    fn collect_idents(&self, expr: &Expr, out: &mut BTreeSet<usize>) {
        match &expr.kind {
            ExprKind::Ident(name) => out.extend(self.indices.get(name.as_str())),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.collect_idents(lhs, out);
                self.collect_idents(rhs, out);
            }
            ExprKind::Unary { operand, .. } | ExprKind::Reveal(operand) => {
                self.collect_idents(operand, out)
            }
            ExprKind::Call { args, .. } | ExprKind::Array(args) => {
                args.iter().for_each(|a| self.collect_idents(a, out))
            }
            ExprKind::Member { object, .. } => self.collect_idents(object, out),
            ExprKind::Index { base, index } => {
                self.collect_idents(base, out);
                self.collect_idents(index, out);
            }
            ExprKind::Literal(_) => {}
        }
    }

    /// Lowers one relation, recording errors instead of returning them
    fn relation(&mut self, expr: &Expr, out: &mut Vec<Constraint>) {
        let result = match &expr.kind {
            ExprKind::Binary { op: BinaryOp::And, lhs, rhs } => match self.range(lhs, rhs) {
                Ok(Some(range)) => Ok(vec![range]),
                Ok(None) => {
                    self.relation(lhs, out);
                    self.relation(rhs, out);
                    return;
                }
                Err(e) => Err(e),
            },
            ExprKind::Binary { op: BinaryOp::Or, .. } => {
                Err(Self::unsupported("disjunctions cannot be constrained", expr.position))
            }
            ExprKind::Binary { op: BinaryOp::Eq, lhs, rhs } => self.equality(lhs, rhs),
            ExprKind::Binary { op: BinaryOp::Ne, lhs, rhs } => self
                .difference(lhs, rhs)
                .map(|polynomial| vec![Constraint::NotEqual { polynomial }]),
            ExprKind::Binary { op, lhs, rhs } if op.is_comparison() => {
                self.inequality(*op, lhs, rhs).map(|ineq| {
                    vec![Constraint::Compare {
                        lhs: ineq.lhs.into_polynomial(),
                        op: ineq.op,
                        rhs: ineq.rhs.into_polynomial(),
                    }]
                })
            }
            ExprKind::Call { .. } => self.predicate(expr, None).map(|c| vec![c]),
            _ => Err(Self::unsupported("expression is not a relation", expr.position)),
        };

        match result {
            Ok(constraints) => out.extend(constraints),
            Err(error) => self.errors.push(error),
        }
    }

    fn equality(&mut self, lhs: &Expr, rhs: &Expr) -> Result<Vec<Constraint>, SemanticError> {
        match (&lhs.kind, &rhs.kind) {
            (ExprKind::Call { .. }, ExprKind::Call { .. }) => Err(Self::unsupported(
                "a predicate must be compared against a signal or constant",
                lhs.position,
            )),
            (ExprKind::Call { .. }, _) => Ok(vec![self.predicate(lhs, Some(rhs))?]),
            (_, ExprKind::Call { .. }) => Ok(vec![self.predicate(rhs, Some(lhs))?]),
            _ => Ok(vec![Constraint::Equal { polynomial: self.difference(lhs, rhs)? }]),
        }
    }

    fn difference(&self, lhs: &Expr, rhs: &Expr) -> Result<Polynomial, SemanticError> {
        let l = self.poly(lhs)?;
        let r = self.poly(rhs)?;
        let diff = l.sub(&r).ok_or_else(|| Self::unsupported("coefficient overflow", lhs.position))?;
        Ok(diff.into_polynomial())
    }

    /// Normalizes `>` and `>=` by swapping sides
    fn inequality(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Inequality, SemanticError> {
        let l = self.poly(lhs)?;
        let r = self.poly(rhs)?;
        Ok(match op {
            BinaryOp::Lt => Inequality { lhs: l, op: Comparison::Lt, rhs: r },
            BinaryOp::Le => Inequality { lhs: l, op: Comparison::Le, rhs: r },
            BinaryOp::Gt => Inequality { lhs: r, op: Comparison::Lt, rhs: l },
            BinaryOp::Ge => Inequality { lhs: r, op: Comparison::Le, rhs: l },
            _ => return Err(Self::unsupported("expected a comparison", lhs.position)),
        })
    }

    fn as_ordering(&self, expr: &Expr) -> Result<Option<Inequality>, SemanticError> {
        match &expr.kind {
            ExprKind::Binary { op, lhs, rhs }
                if matches!(op, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge) =>
            {
                self.inequality(*op, lhs, rhs).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// `lo < x && x < hi`, in any orientation of either comparison
    fn range(&self, lhs: &Expr, rhs: &Expr) -> Result<Option<Constraint>, SemanticError> {
        let (Some(first), Some(second)) = (self.as_ordering(lhs)?, self.as_ordering(rhs)?) else {
            return Ok(None);
        };

        let range = |lower: Inequality, upper: Inequality| Constraint::Range {
            lower: lower.lhs.into_polynomial(),
            lower_op: lower.op,
            value: lower.rhs.into_polynomial(),
            upper_op: upper.op,
            upper: upper.rhs.into_polynomial(),
        };

        if first.rhs == second.lhs && first.rhs.degree() > 0 {
            Ok(Some(range(first, second)))
        } else if second.rhs == first.lhs && first.lhs.degree() > 0 {
            Ok(Some(range(second, first)))
        } else {
            Ok(None)
        }
    }

    fn poly(&self, expr: &Expr) -> Result<Poly, SemanticError> {
        let overflow = || Self::unsupported("coefficient overflow", expr.position);
        match &expr.kind {
            ExprKind::Literal(Literal::Number(value)) => {
                Ok(Poly::constant(to_i128(*value).ok_or_else(overflow)?))
            }
            ExprKind::Literal(Literal::Bool(value)) => Ok(Poly::constant(i128::from(*value))),
            ExprKind::Ident(name) => Ok(Poly::variable(self.signal(name, expr.position)?)),
            ExprKind::Unary { op: UnaryOp::Neg, operand } => {
                self.poly(operand)?.neg().ok_or_else(overflow)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.poly(lhs)?;
                let r = self.poly(rhs)?;
                match op {
                    BinaryOp::Add => l.add(&r).ok_or_else(overflow),
                    BinaryOp::Sub => l.sub(&r).ok_or_else(overflow),
                    BinaryOp::Mul => {
                        let product = l.mul(&r).ok_or_else(overflow)?;
                        if product.degree() > 2 {
                            return Err(Self::unsupported("degree exceeds 2", expr.position));
                        }
                        Ok(product)
                    }
                    BinaryOp::Div | BinaryOp::Mod => {
                        Err(Self::unsupported("division is not expressible", expr.position))
                    }
                    _ => Err(Self::unsupported(
                        format!("`{}` inside an arithmetic expression", op.symbol()),
                        expr.position,
                    )),
                }
            }
            ExprKind::Call { callee, .. } => Err(Self::unsupported(
                format!("`{}` may only appear at the top of a constraint", callee.name),
                expr.position,
            )),
            _ => Err(Self::unsupported("expression is not arithmetic", expr.position)),
        }
    }

    fn signal(&self, name: &str, position: Position) -> Result<usize, SemanticError> {
        self.indices
            .get(name)
            .copied()
            .ok_or_else(|| SemanticError::UndeclaredPublicInput { name: name.to_string(), position })
    }

    fn operand(&self, expr: &Expr) -> Result<Operand, SemanticError> {
        match &expr.kind {
            ExprKind::Ident(name) => Ok(Operand::Variable(self.signal(name, expr.position)?)),
            ExprKind::Literal(Literal::Number(value)) => to_i128(*value)
                .map(Operand::Constant)
                .ok_or_else(|| Self::unsupported("coefficient overflow", expr.position)),
            _ => Err(Self::unsupported(
                "predicate operands must be signals or constants",
                expr.position,
            )),
        }
    }

    fn predicate(&self, call: &Expr, result: Option<&Expr>) -> Result<Constraint, SemanticError> {
        let ExprKind::Call { callee, args } = &call.kind else {
            return Err(Self::unsupported("expected a predicate call", call.position));
        };
        let predicate = Predicate::from_name(&callee.name).ok_or_else(|| {
            SemanticError::UnknownPredicate { name: callee.name.clone(), position: callee.position }
        })?;
        let arity_error = |found: usize| SemanticError::BadPredicateArity {
            predicate: predicate.name().to_string(),
            expected: predicate.signature().to_string(),
            found,
            position: call.position,
        };

        let operands: Vec<&Expr> = match predicate {
            Predicate::Poseidon => match args.as_slice() {
                [Expr { kind: ExprKind::Array(elements), .. }] => {
                    if elements.is_empty() || elements.len() > Predicate::POSEIDON_MAX_WIDTH {
                        return Err(arity_error(elements.len()));
                    }
                    elements.iter().collect()
                }
                _ => return Err(arity_error(args.len())),
            },
            Predicate::Pedersen if args.len() != 2 => return Err(arity_error(args.len())),
            Predicate::VerifySignature if args.len() != 3 => return Err(arity_error(args.len())),
            _ => args.iter().collect(),
        };

        let result = match (predicate.has_result(), result) {
            (true, Some(expr)) => Some(self.operand(expr)?),
            (false, None) => None,
            (true, None) => {
                return Err(Self::unsupported(
                    format!("the result of `{}` must be compared against a signal", predicate.name()),
                    call.position,
                ))
            }
            (false, Some(_)) => {
                return Err(Self::unsupported(
                    format!("`{}` has no result to compare", predicate.name()),
                    call.position,
                ))
            }
        };

        let args = operands.into_iter().map(|e| self.operand(e)).collect::<Result<_, _>>()?;
        Ok(Constraint::Predicate { predicate, args, result })
    }
}

fn to_i128(value: U256) -> Option<i128> {
    if value.bit_len() > 127 {
        return None;
    }
    let limbs = value.as_limbs();
    Some((u128::from(limbs[1]) << 64 | u128::from(limbs[0])) as i128)
}
