//! Abstract syntax tree of a Veil contract
//!
//! Every node carries the position of its first token. The tree is produced
//! by the parser and read by every later pass; the only mutation after
//! parsing is the storage slot annotation written by [`crate::layout`].

use alloy_primitives::{Address, U256};
use veil_runtime::SignalKind;

use crate::token::Position;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub position: Position,
}

impl Ident {
    pub fn new(name: impl Into<String>, position: Position) -> Self {
        Self { name: name.into(), position }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDecl {
    pub name: Ident,
    pub items: Vec<Item>,
    pub position: Position,
}

impl ContractDecl {
    pub fn functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn mpc_functions(&self) -> impl Iterator<Item = &MpcFunctionDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::MpcFunction(f) => Some(f),
            _ => None,
        })
    }

    pub fn circuits(&self) -> impl Iterator<Item = &CircuitDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Circuit(c) => Some(c),
            _ => None,
        })
    }

    pub fn events(&self) -> impl Iterator<Item = &EventDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Event(e) => Some(e),
            _ => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions().find(|f| f.name.name == name)
    }

    pub fn circuit(&self, name: &str) -> Option<&CircuitDecl> {
        self.circuits().find(|c| c.name.name == name)
    }

    pub fn event(&self, name: &str) -> Option<&EventDecl> {
        self.events().find(|e| e.name.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    StateVar(StateVarDecl),
    Mapping(MappingDecl),
    Event(EventDecl),
    Function(FunctionDecl),
    MpcFunction(MpcFunctionDecl),
    Circuit(CircuitDecl),
}

impl Item {
    pub fn name(&self) -> &Ident {
        match self {
            Self::StateVar(v) => &v.name,
            Self::Mapping(m) => &m.name,
            Self::Event(e) => &e.name,
            Self::Function(f) => &f.name,
            Self::MpcFunction(f) => &f.name,
            Self::Circuit(c) => &c.name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutability {
    View,
    Pure,
}

impl Mutability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Pure => "pure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementaryType {
    Uint(u16),
    Bool,
    Address,
    Bytes(u8),
}

impl ElementaryType {
    pub fn canonical(self) -> String {
        match self {
            Self::Uint(bits) => format!("uint{bits}"),
            Self::Bool => "bool".to_string(),
            Self::Address => "address".to_string(),
            Self::Bytes(len) => format!("bytes{len}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeName {
    Elementary(ElementaryType),
    Mapping { key: Box<TypeName>, value: Box<TypeName> },
    Array(Box<TypeName>),
    Secret(Box<TypeName>),
    /// Opaque proof handle, passed on the wire as `bytes32`
    Proof,
}

impl TypeName {
    pub fn uint256() -> Self {
        Self::Elementary(ElementaryType::Uint(256))
    }

    /// Canonical ABI spelling; `secret<T>` is spelled as `T`
    pub fn canonical(&self) -> String {
        match self {
            Self::Elementary(e) => e.canonical(),
            Self::Mapping { key, value } => {
                format!("mapping({}=>{})", key.canonical(), value.canonical())
            }
            Self::Array(inner) => format!("{}[]", inner.canonical()),
            Self::Secret(inner) => inner.canonical(),
            Self::Proof => "bytes32".to_string(),
        }
    }

    /// True for `secret<T>` and arrays of secrets
    pub fn is_secret(&self) -> bool {
        match self {
            Self::Secret(_) => true,
            Self::Array(inner) => inner.is_secret(),
            _ => false,
        }
    }

    pub fn is_array(&self) -> bool {
        match self {
            Self::Array(_) => true,
            Self::Secret(inner) => inner.is_array(),
            _ => false,
        }
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Mapping { .. })
    }

    /// Element type of an array; secrecy of the array as a whole is not carried
    pub fn element(&self) -> Option<&TypeName> {
        match self {
            Self::Array(inner) => Some(inner),
            Self::Secret(inner) => inner.element(),
            _ => None,
        }
    }

    /// A type that fits in one machine word
    pub fn is_word(&self) -> bool {
        match self {
            Self::Elementary(_) | Self::Proof => true,
            Self::Secret(inner) => inner.is_word(),
            Self::Mapping { .. } | Self::Array(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVarDecl {
    pub name: Ident,
    pub ty: TypeName,
    pub visibility: Visibility,
    /// Filled in by the storage layout allocator
    pub slot: Option<u64>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingDecl {
    pub name: Ident,
    /// Always a [`TypeName::Mapping`]
    pub ty: TypeName,
    pub visibility: Visibility,
    /// Base slot, filled in by the storage layout allocator
    pub slot: Option<u64>,
    pub position: Position,
}

impl MappingDecl {
    /// Key types from the outermost mapping inwards
    pub fn keys(&self) -> Vec<&TypeName> {
        let mut keys = Vec::new();
        let mut ty = &self.ty;
        while let TypeName::Mapping { key, value } = ty {
            keys.push(key.as_ref());
            ty = value;
        }
        keys
    }

    /// Type stored after all keys are applied
    pub fn value_type(&self) -> &TypeName {
        let mut ty = &self.ty;
        while let TypeName::Mapping { value, .. } = ty {
            ty = value;
        }
        ty
    }

    pub fn depth(&self) -> usize {
        self.keys().len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventParam {
    pub ty: TypeName,
    pub name: Option<Ident>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDecl {
    pub name: Ident,
    pub params: Vec<EventParam>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub ty: TypeName,
    pub name: Ident,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    pub name: Ident,
    pub params: Vec<Param>,
    /// Defaults to private when no visibility modifier is given
    pub visibility: Visibility,
    pub mutability: Option<Mutability>,
    /// `circuit Name` modifier: calls are gated by a proof for that circuit
    pub circuit: Option<Ident>,
    pub returns: Vec<TypeName>,
    pub body: Block,
    pub position: Position,
}

impl FunctionDecl {
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpcFunctionDecl {
    pub name: Ident,
    /// Parameters of `secret<T>` or `secret<T>[]` type, in declaration order
    pub secret_params: Vec<Param>,
    /// Remaining parameters, in declaration order
    pub plain_params: Vec<Param>,
    pub returns: Vec<TypeName>,
    pub body: Block,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalDecl {
    pub name: Ident,
    pub kind: SignalKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitDecl {
    /// Declared name, or `circuit_<n>` for anonymous circuits
    pub name: Ident,
    /// Witnesses, inputs and outputs in declaration order
    pub signals: Vec<SignalDecl>,
    /// `constraint` expressions, unvalidated
    pub constraints: Vec<Expr>,
    pub position: Position,
}

impl CircuitDecl {
    fn signals_of(&self, kind: SignalKind) -> impl Iterator<Item = &SignalDecl> {
        self.signals.iter().filter(move |s| s.kind == kind)
    }

    pub fn witnesses(&self) -> impl Iterator<Item = &SignalDecl> {
        self.signals_of(SignalKind::Witness)
    }

    pub fn public_inputs(&self) -> impl Iterator<Item = &SignalDecl> {
        self.signals_of(SignalKind::Input)
    }

    pub fn public_outputs(&self) -> impl Iterator<Item = &SignalDecl> {
        self.signals_of(SignalKind::Output)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDecl> {
        self.signals.iter().find(|s| s.name.name == name)
    }
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    Require { condition: Expr, message: Option<String> },
    /// Plain and compound assignment; `a += b` is stored as `a = a + b`
    Assign { target: Expr, value: Expr },
    VarDecl { ty: TypeName, name: Ident, value: Option<Expr> },
    /// `else if` is an else block holding a single `If`
    If { condition: Expr, then_block: Block, else_block: Option<Block> },
    For { init: Option<Box<Stmt>>, condition: Option<Expr>, step: Option<Box<Stmt>>, body: Block },
    Return(Vec<Expr>),
    Emit { event: Ident, args: Vec<Expr> },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Number(U256),
    Bool(bool),
    Str(String),
    Address(Address),
    HexBytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Binding power; higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            Self::Mul | Self::Div | Self::Mod => 5,
            Self::Add | Self::Sub => 4,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge => 3,
            Self::And => 2,
            Self::Or => 1,
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod)
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Literal(Literal),
    Ident(String),
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Call { callee: Ident, args: Vec<Expr> },
    /// `object.member`, e.g. `msg.sender` or `values.length`
    Member { object: Box<Expr>, member: Ident },
    Index { base: Box<Expr>, index: Box<Expr> },
    Array(Vec<Expr>),
    Reveal(Box<Expr>),
}

impl Expr {
    pub fn new(kind: ExprKind, position: Position) -> Self {
        Self { kind, position }
    }

    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// `msg.sender` style access on a bare identifier
    pub fn as_builtin(&self) -> Option<Builtin> {
        match &self.kind {
            ExprKind::Member { object, member } => {
                Builtin::from_parts(object.as_ident()?, &member.name)
            }
            _ => None,
        }
    }

    /// Root identifier and index expressions of `name[k1][k2]...`
    pub fn index_chain(&self) -> Option<(&str, Vec<&Expr>)> {
        let mut keys = Vec::new();
        let mut expr = self;
        while let ExprKind::Index { base, index } = &expr.kind {
            keys.push(index.as_ref());
            expr = base;
        }
        keys.reverse();
        Some((expr.as_ident()?, keys))
    }
}

/// Environment values readable from ordinary functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    MsgSender,
    MsgValue,
    BlockTimestamp,
    BlockNumber,
}

impl Builtin {
    pub fn from_parts(object: &str, member: &str) -> Option<Self> {
        match (object, member) {
            ("msg", "sender") => Some(Self::MsgSender),
            ("msg", "value") => Some(Self::MsgValue),
            ("block", "timestamp") => Some(Self::BlockTimestamp),
            ("block", "number") => Some(Self::BlockNumber),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(key: TypeName, value: TypeName) -> TypeName {
        TypeName::Mapping { key: Box::new(key), value: Box::new(value) }
    }

    #[test]
    fn test_nested_mapping_keys() {
        let address = TypeName::Elementary(ElementaryType::Address);
        let decl = MappingDecl {
            name: Ident::new("allowance", Position::default()),
            ty: mapping(address.clone(), mapping(address.clone(), TypeName::uint256())),
            visibility: Visibility::Public,
            slot: None,
            position: Position::default(),
        };
        assert_eq!(decl.depth(), 2);
        assert_eq!(decl.keys(), vec![&address, &address]);
        assert_eq!(decl.value_type(), &TypeName::uint256());
    }

    #[test]
    fn test_canonical_types() {
        assert_eq!(TypeName::uint256().canonical(), "uint256");
        assert_eq!(TypeName::Proof.canonical(), "bytes32");
        let secret_array = TypeName::Array(Box::new(TypeName::Secret(Box::new(TypeName::uint256()))));
        assert_eq!(secret_array.canonical(), "uint256[]");
        assert!(secret_array.is_secret());
        assert!(secret_array.is_array());
    }

    #[test]
    fn test_precedence_order() {
        assert!(BinaryOp::Mul.precedence() > BinaryOp::Add.precedence());
        assert!(BinaryOp::Add.precedence() > BinaryOp::Lt.precedence());
        assert!(BinaryOp::Eq.precedence() > BinaryOp::And.precedence());
        assert!(BinaryOp::And.precedence() > BinaryOp::Or.precedence());
    }
}
