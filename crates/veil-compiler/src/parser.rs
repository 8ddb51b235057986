//! Recursive-descent parser with precedence climbing for expressions
//!
//! The parser stops at the first structural mismatch. Besides syntax it
//! enforces the declaration rules that need no type information: modifiers
//! may not repeat, names may not repeat within a contract, a parameter list
//! or a circuit, and `secret<T>` only appears inside mpc functions.
//!
//! Expressions, blocks and types share one nesting budget so that every
//! later recursive pass over the tree stays within a bounded depth.

use std::collections::HashSet;

use alloy_primitives::{Address, U256};
use tracing::{debug, instrument};

use crate::ast::*;
use crate::error::ParseError;
use crate::token::{Keyword, Operator, Position, Punct, Token, TokenKind};
use veil_runtime::SignalKind;

type PResult<T> = Result<T, ParseError>;

/// Deepest accepted nesting of expressions, blocks and types
pub const MAX_NESTING_DEPTH: usize = 64;

#[instrument(level = "debug", skip_all, fields(tokens = tokens.len()))]
pub fn parse_tokens(tokens: &[Token]) -> PResult<ContractDecl> {
    let contract = Parser::new(tokens).contract()?;
    debug!(contract = %contract.name.name, items = contract.items.len(), "parsed contract");
    Ok(contract)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    circuit_count: usize,
    depth: usize,
    /// Set while parsing the parameters and body of an mpc function
    allow_secret: bool,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0, circuit_count: 0, depth: 0, allow_secret: false }
    }

    // ---- token cursor ----

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&'a TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn peek_nth(&self, n: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + n)
    }

    fn position(&self) -> Position {
        match self.peek() {
            Some(token) => token.position,
            None => self
                .tokens
                .last()
                .map(|t| Position::new(t.position.line, t.position.column + t.lexeme.chars().count()))
                .unwrap_or_else(|| Position::new(1, 1)),
        }
    }

    fn unexpected(&self, expected: impl Into<String>) -> ParseError {
        let found = match self.peek() {
            Some(token) => token.to_string(),
            None => "end of input".to_string(),
        };
        ParseError::Unexpected { expected: expected.into(), found, position: self.position() }
    }

    /// Enters one nesting level. Levels taken by a failed parse are never
    /// given back, which is fine since the first error ends parsing.
    fn descend(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ParseError::NestingTooDeep { limit: MAX_NESTING_DEPTH, position: self.position() });
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.descend()?;
        let result = parse(self)?;
        self.depth -= 1;
        Ok(result)
    }

    fn check_punct(&self, punct: Punct) -> bool {
        self.peek().is_some_and(|t| t.is_punct(punct))
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(keyword))
    }

    fn check_operator(&self, op: Operator) -> bool {
        self.peek().is_some_and(|t| t.is_operator(op))
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        let matched = self.check_punct(punct);
        if matched {
            self.pos += 1;
        }
        matched
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        let matched = self.check_keyword(keyword);
        if matched {
            self.pos += 1;
        }
        matched
    }

    fn eat_operator(&mut self, op: Operator) -> bool {
        let matched = self.check_operator(op);
        if matched {
            self.pos += 1;
        }
        matched
    }

    fn expect_punct(&mut self, punct: Punct) -> PResult<Position> {
        let position = self.position();
        if self.eat_punct(punct) {
            Ok(position)
        } else {
            Err(self.unexpected(format!("`{}`", punct.as_char())))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword, spelling: &str) -> PResult<Position> {
        let position = self.position();
        if self.eat_keyword(keyword) {
            Ok(position)
        } else {
            Err(self.unexpected(format!("`{spelling}`")))
        }
    }

    fn expect_operator(&mut self, op: Operator) -> PResult<()> {
        if self.eat_operator(op) {
            Ok(())
        } else {
            Err(self.unexpected(format!("`{}`", op.as_str())))
        }
    }

    fn expect_ident(&mut self) -> PResult<Ident> {
        match self.peek() {
            Some(Token { kind: TokenKind::Identifier(name), position, .. }) => {
                self.pos += 1;
                Ok(Ident::new(name.clone(), *position))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Comma separated list up to (and consuming) `close`
    fn list<T>(&mut self, close: Punct, mut item: impl FnMut(&mut Self) -> PResult<T>) -> PResult<Vec<T>> {
        let mut items = Vec::new();
        if self.eat_punct(close) {
            return Ok(items);
        }
        loop {
            items.push(item(self)?);
            if self.eat_punct(close) {
                return Ok(items);
            }
            if !self.eat_punct(Punct::Comma) {
                return Err(self.unexpected(format!("`,` or `{}`", close.as_char())));
            }
        }
    }

    // ---- declarations ----

    fn contract(&mut self) -> PResult<ContractDecl> {
        let position = self.expect_keyword(Keyword::Contract, "contract")?;
        let name = self.expect_ident()?;
        self.expect_punct(Punct::LBrace)?;

        let mut items = Vec::new();
        let mut names = HashSet::new();
        while !self.eat_punct(Punct::RBrace) {
            if self.peek().is_none() {
                return Err(self.unexpected("`}`"));
            }
            let item = self.item()?;
            let item_name = item.name();
            if !names.insert(item_name.name.clone()) {
                return Err(ParseError::DuplicateDeclaration {
                    name: item_name.name.clone(),
                    position: item_name.position,
                });
            }
            items.push(item);
        }

        if self.peek().is_some() {
            return Err(self.unexpected("end of input"));
        }
        Ok(ContractDecl { name, items, position })
    }

    fn item(&mut self) -> PResult<Item> {
        match self.peek_kind() {
            Some(TokenKind::Keyword(Keyword::Event)) => self.event().map(Item::Event),
            Some(TokenKind::Keyword(Keyword::Function)) => self.function().map(Item::Function),
            Some(TokenKind::Keyword(Keyword::Mpc)) => self.mpc_function().map(Item::MpcFunction),
            Some(TokenKind::Keyword(Keyword::Circuit)) => self.circuit().map(Item::Circuit),
            Some(TokenKind::Keyword(k)) if k.is_type() => self.state_var(),
            _ => Err(self.unexpected("contract member")),
        }
    }

    fn state_var(&mut self) -> PResult<Item> {
        let position = self.position();
        let ty = self.type_name()?;
        let visibility = if self.eat_keyword(Keyword::Public) {
            Visibility::Public
        } else {
            self.eat_keyword(Keyword::Private);
            Visibility::Private
        };
        let name = self.expect_ident()?;
        self.expect_punct(Punct::Semicolon)?;

        Ok(if ty.is_mapping() {
            Item::Mapping(MappingDecl { name, ty, visibility, slot: None, position })
        } else {
            Item::StateVar(StateVarDecl { name, ty, visibility, slot: None, position })
        })
    }

    fn event(&mut self) -> PResult<EventDecl> {
        let position = self.expect_keyword(Keyword::Event, "event")?;
        let name = self.expect_ident()?;
        self.expect_punct(Punct::LParen)?;
        let params = self.list(Punct::RParen, |p| {
            let ty = p.type_name()?;
            let name = match p.peek_kind() {
                Some(TokenKind::Identifier(_)) => Some(p.expect_ident()?),
                _ => None,
            };
            Ok(EventParam { ty, name })
        })?;
        self.expect_punct(Punct::Semicolon)?;
        Ok(EventDecl { name, params, position })
    }

    fn params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct(Punct::LParen)?;
        let params = self.list(Punct::RParen, |p| {
            let ty = p.type_name()?;
            let name = p.expect_ident()?;
            Ok(Param { ty, name })
        })?;

        let mut seen = HashSet::new();
        for param in &params {
            if !seen.insert(param.name.name.as_str()) {
                return Err(ParseError::DuplicateDeclaration {
                    name: param.name.name.clone(),
                    position: param.name.position,
                });
            }
        }
        Ok(params)
    }

    fn function(&mut self) -> PResult<FunctionDecl> {
        let position = self.expect_keyword(Keyword::Function, "function")?;
        let name = self.expect_ident()?;
        let params = self.params()?;

        let mut visibility = None;
        let mut mutability = None;
        let mut circuit = None;
        while let Some(token) = self.peek() {
            let duplicate = match token.kind {
                TokenKind::Keyword(Keyword::Public | Keyword::Private) => {
                    let value = if token.is_keyword(Keyword::Public) {
                        Visibility::Public
                    } else {
                        Visibility::Private
                    };
                    visibility.replace(value).is_some()
                }
                TokenKind::Keyword(Keyword::View) => mutability.replace(Mutability::View).is_some(),
                TokenKind::Keyword(Keyword::Pure) => mutability.replace(Mutability::Pure).is_some(),
                TokenKind::Keyword(Keyword::Circuit) => {
                    self.pos += 1;
                    let ident = self.expect_ident()?;
                    if circuit.replace(ident).is_some() {
                        return Err(ParseError::DuplicateModifier {
                            modifier: token.lexeme.clone(),
                            position: token.position,
                        });
                    }
                    continue;
                }
                _ => break,
            };
            if duplicate {
                return Err(ParseError::DuplicateModifier {
                    modifier: token.lexeme.clone(),
                    position: token.position,
                });
            }
            self.pos += 1;
        }

        let returns = if self.eat_keyword(Keyword::Returns) {
            self.expect_punct(Punct::LParen)?;
            self.type_list()?
        } else {
            Vec::new()
        };
        let body = self.block()?;

        Ok(FunctionDecl {
            name,
            params,
            visibility: visibility.unwrap_or(Visibility::Private),
            mutability,
            circuit,
            returns,
            body,
            position,
        })
    }

    /// Non-empty type list after an already consumed `(`
    fn type_list(&mut self) -> PResult<Vec<TypeName>> {
        let types = self.list(Punct::RParen, Self::type_name)?;
        if types.is_empty() {
            return Err(self.unexpected("type"));
        }
        Ok(types)
    }

    fn mpc_function(&mut self) -> PResult<MpcFunctionDecl> {
        let position = self.expect_keyword(Keyword::Mpc, "mpc")?;
        self.expect_keyword(Keyword::Function, "function")?;
        let name = self.expect_ident()?;
        self.allow_secret = true;
        let params = self.params()?;
        self.allow_secret = false;
        let (secret_params, plain_params): (Vec<Param>, Vec<Param>) =
            params.into_iter().partition(|p| p.ty.is_secret());

        let returns = if self.eat_operator(Operator::Arrow) {
            if self.eat_punct(Punct::LParen) {
                self.type_list()?
            } else {
                vec![self.type_name()?]
            }
        } else {
            Vec::new()
        };
        self.allow_secret = true;
        let body = self.block()?;
        self.allow_secret = false;

        Ok(MpcFunctionDecl { name, secret_params, plain_params, returns, body, position })
    }

    fn circuit(&mut self) -> PResult<CircuitDecl> {
        let position = self.expect_keyword(Keyword::Circuit, "circuit")?;
        let ordinal = self.circuit_count;
        self.circuit_count += 1;
        let name = match self.peek_kind() {
            Some(TokenKind::Identifier(_)) => self.expect_ident()?,
            _ => Ident::new(format!("circuit_{ordinal}"), position),
        };
        self.expect_punct(Punct::LBrace)?;

        let mut signals: Vec<SignalDecl> = Vec::new();
        let mut constraints = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            let kind = if self.eat_keyword(Keyword::Private) {
                self.expect_keyword(Keyword::Witness, "witness")?;
                SignalKind::Witness
            } else if self.eat_keyword(Keyword::Public) {
                if self.eat_keyword(Keyword::Input) {
                    SignalKind::Input
                } else if self.eat_keyword(Keyword::Output) {
                    SignalKind::Output
                } else {
                    return Err(self.unexpected("`input` or `output`"));
                }
            } else if self.eat_keyword(Keyword::Constraint) {
                constraints.push(self.expr()?);
                self.expect_punct(Punct::Semicolon)?;
                continue;
            } else {
                return Err(self.unexpected("signal or constraint declaration"));
            };

            let signal = self.expect_ident()?;
            self.expect_punct(Punct::Semicolon)?;
            if signals.iter().any(|s| s.name.name == signal.name) {
                return Err(ParseError::DuplicateDeclaration {
                    name: signal.name,
                    position: signal.position,
                });
            }
            signals.push(SignalDecl { name: signal, kind });
        }

        Ok(CircuitDecl { name, signals, constraints, position })
    }

    // ---- types ----

    fn type_name(&mut self) -> PResult<TypeName> {
        let mut ty = match self.peek_kind() {
            Some(TokenKind::Keyword(keyword)) => match *keyword {
                Keyword::Uint(bits) => {
                    self.pos += 1;
                    TypeName::Elementary(ElementaryType::Uint(bits))
                }
                Keyword::Bool => {
                    self.pos += 1;
                    TypeName::Elementary(ElementaryType::Bool)
                }
                Keyword::Address => {
                    self.pos += 1;
                    TypeName::Elementary(ElementaryType::Address)
                }
                Keyword::Bytes(len) => {
                    self.pos += 1;
                    TypeName::Elementary(ElementaryType::Bytes(len))
                }
                Keyword::Proof => {
                    self.pos += 1;
                    TypeName::Proof
                }
                Keyword::Secret => {
                    if !self.allow_secret {
                        return Err(ParseError::SecretOutsideMpc { position: self.position() });
                    }
                    self.pos += 1;
                    self.expect_operator(Operator::Lt)?;
                    let inner = self.nested(Self::type_name)?;
                    self.expect_operator(Operator::Gt)?;
                    TypeName::Secret(Box::new(inner))
                }
                Keyword::Mapping => self.mapping_type()?,
                _ => return Err(self.unexpected("type")),
            },
            _ => return Err(self.unexpected("type")),
        };

        let depth = self.depth;
        while self.check_punct(Punct::LBracket)
            && self.peek_nth(1).is_some_and(|t| t.is_punct(Punct::RBracket))
        {
            self.descend()?;
            self.pos += 2;
            ty = TypeName::Array(Box::new(ty));
        }
        self.depth = depth;
        Ok(ty)
    }

    fn mapping_type(&mut self) -> PResult<TypeName> {
        self.expect_keyword(Keyword::Mapping, "mapping")?;
        self.expect_punct(Punct::LParen)?;
        let key_position = self.position();
        let key = self.type_name()?;
        if !matches!(key, TypeName::Elementary(_)) {
            return Err(ParseError::Unexpected {
                expected: "elementary key type".to_string(),
                found: format!("`{}`", key.canonical()),
                position: key_position,
            });
        }
        self.expect_operator(Operator::FatArrow)?;
        let value = self.nested(Self::type_name)?;
        self.expect_punct(Punct::RParen)?;
        Ok(TypeName::Mapping { key: Box::new(key), value: Box::new(value) })
    }

    fn at_type(&self) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Keyword(k)) if k.is_type())
    }

    // ---- statements ----

    fn block(&mut self) -> PResult<Block> {
        self.expect_punct(Punct::LBrace)?;
        self.nested(|p| {
            let mut stmts = Vec::new();
            while !p.eat_punct(Punct::RBrace) {
                if p.peek().is_none() {
                    return Err(p.unexpected("`}`"));
                }
                stmts.push(p.stmt()?);
            }
            Ok(stmts)
        })
    }

    fn stmt(&mut self) -> PResult<Stmt> {
        let position = self.position();
        let kind = match self.peek_kind() {
            Some(TokenKind::Keyword(Keyword::Require)) => {
                self.pos += 1;
                self.expect_punct(Punct::LParen)?;
                let condition = self.expr()?;
                let message = if self.eat_punct(Punct::Comma) {
                    match self.peek_kind() {
                        Some(TokenKind::Str(message)) => {
                            self.pos += 1;
                            Some(message.clone())
                        }
                        _ => return Err(self.unexpected("string literal")),
                    }
                } else {
                    None
                };
                self.expect_punct(Punct::RParen)?;
                self.expect_punct(Punct::Semicolon)?;
                StmtKind::Require { condition, message }
            }
            Some(TokenKind::Keyword(Keyword::If)) => return self.if_stmt(),
            Some(TokenKind::Keyword(Keyword::For)) => {
                self.pos += 1;
                self.expect_punct(Punct::LParen)?;
                let init = if self.check_punct(Punct::Semicolon) {
                    None
                } else {
                    Some(Box::new(self.simple_stmt()?))
                };
                self.expect_punct(Punct::Semicolon)?;
                let condition =
                    if self.check_punct(Punct::Semicolon) { None } else { Some(self.expr()?) };
                self.expect_punct(Punct::Semicolon)?;
                let step = if self.check_punct(Punct::RParen) {
                    None
                } else {
                    Some(Box::new(self.simple_stmt()?))
                };
                self.expect_punct(Punct::RParen)?;
                let body = self.block()?;
                StmtKind::For { init, condition, step, body }
            }
            Some(TokenKind::Keyword(Keyword::Return)) => {
                self.pos += 1;
                let values = if self.check_punct(Punct::Semicolon) {
                    Vec::new()
                } else if self.at_tuple() {
                    self.pos += 1;
                    self.list(Punct::RParen, Self::expr)?
                } else {
                    vec![self.expr()?]
                };
                self.expect_punct(Punct::Semicolon)?;
                StmtKind::Return(values)
            }
            Some(TokenKind::Keyword(Keyword::Emit)) => {
                self.pos += 1;
                let event = self.expect_ident()?;
                self.expect_punct(Punct::LParen)?;
                let args = self.list(Punct::RParen, Self::expr)?;
                self.expect_punct(Punct::Semicolon)?;
                StmtKind::Emit { event, args }
            }
            _ => {
                let stmt = self.simple_stmt()?;
                self.expect_punct(Punct::Semicolon)?;
                return Ok(stmt);
            }
        };
        Ok(Stmt { kind, position })
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        let position = self.expect_keyword(Keyword::If, "if")?;
        self.expect_punct(Punct::LParen)?;
        let condition = self.expr()?;
        self.expect_punct(Punct::RParen)?;
        let then_block = self.block()?;
        let else_block = if self.eat_keyword(Keyword::Else) {
            if self.check_keyword(Keyword::If) {
                Some(vec![self.nested(Self::if_stmt)?])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Stmt { kind: StmtKind::If { condition, then_block, else_block }, position })
    }

    /// Declaration, assignment or expression without the trailing `;`
    fn simple_stmt(&mut self) -> PResult<Stmt> {
        let position = self.position();
        if self.at_type() {
            let ty = self.type_name()?;
            let name = self.expect_ident()?;
            let value = if self.eat_operator(Operator::Assign) { Some(self.expr()?) } else { None };
            return Ok(Stmt { kind: StmtKind::VarDecl { ty, name, value }, position });
        }

        let target = self.expr()?;
        let compound = match self.peek_kind() {
            Some(TokenKind::Operator(Operator::Assign)) => None,
            Some(TokenKind::Operator(Operator::PlusAssign)) => Some(BinaryOp::Add),
            Some(TokenKind::Operator(Operator::MinusAssign)) => Some(BinaryOp::Sub),
            Some(TokenKind::Operator(Operator::StarAssign)) => Some(BinaryOp::Mul),
            _ => return Ok(Stmt { kind: StmtKind::Expr(target), position }),
        };
        self.pos += 1;
        let rhs = self.expr()?;
        let value = match compound {
            Some(op) => Expr::new(
                ExprKind::Binary { op, lhs: Box::new(target.clone()), rhs: Box::new(rhs) },
                target.position,
            ),
            None => rhs,
        };
        Ok(Stmt { kind: StmtKind::Assign { target, value }, position })
    }

    /// `(` opening a parenthesized list with a top-level comma
    fn at_tuple(&self) -> bool {
        if !self.check_punct(Punct::LParen) {
            return false;
        }
        let mut depth = 0usize;
        for token in &self.tokens[self.pos..] {
            match token.kind {
                TokenKind::Punct(Punct::LParen | Punct::LBracket) => depth += 1,
                TokenKind::Punct(Punct::RParen | Punct::RBracket) => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return false;
                    }
                }
                TokenKind::Punct(Punct::Comma) if depth == 1 => return true,
                TokenKind::Punct(Punct::Semicolon | Punct::LBrace | Punct::RBrace) => return false,
                _ => {}
            }
        }
        false
    }

    // ---- expressions ----

    fn expr(&mut self) -> PResult<Expr> {
        self.nested(|p| p.binary(1))
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let op = match self.peek_kind()? {
            TokenKind::Operator(op) => op,
            _ => return None,
        };
        Some(match op {
            Operator::Plus => BinaryOp::Add,
            Operator::Minus => BinaryOp::Sub,
            Operator::Star => BinaryOp::Mul,
            Operator::Slash => BinaryOp::Div,
            Operator::Percent => BinaryOp::Mod,
            Operator::EqEq => BinaryOp::Eq,
            Operator::NotEq => BinaryOp::Ne,
            Operator::Lt => BinaryOp::Lt,
            Operator::Le => BinaryOp::Le,
            Operator::Gt => BinaryOp::Gt,
            Operator::Ge => BinaryOp::Ge,
            Operator::AndAnd => BinaryOp::And,
            Operator::OrOr => BinaryOp::Or,
            _ => return None,
        })
    }

    /// Every folded operator deepens the tree by one level
    fn binary(&mut self, min_precedence: u8) -> PResult<Expr> {
        let depth = self.depth;
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_binary_op() {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.descend()?;
            self.pos += 1;
            let rhs = self.binary(precedence + 1)?;
            let position = lhs.position;
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, position);
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let position = self.position();
        let op = if self.eat_operator(Operator::Bang) {
            UnaryOp::Not
        } else if self.eat_operator(Operator::Minus) {
            UnaryOp::Neg
        } else {
            return self.postfix();
        };
        let operand = self.nested(Self::unary)?;
        Ok(Expr::new(ExprKind::Unary { op, operand: Box::new(operand) }, position))
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let depth = self.depth;
        let mut expr = self.primary()?;
        loop {
            let position = expr.position;
            if self.check_punct(Punct::LBracket) || self.check_operator(Operator::Dot) {
                self.descend()?;
            }
            if self.eat_punct(Punct::LBracket) {
                let index = self.expr()?;
                self.expect_punct(Punct::RBracket)?;
                expr = Expr::new(
                    ExprKind::Index { base: Box::new(expr), index: Box::new(index) },
                    position,
                );
            } else if self.eat_operator(Operator::Dot) {
                let member = self.expect_ident()?;
                expr = Expr::new(ExprKind::Member { object: Box::new(expr), member }, position);
            } else {
                self.depth = depth;
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let Some(token) = self.peek() else {
            return Err(self.unexpected("expression"));
        };
        let position = token.position;
        let literal = |kind: Literal| -> PResult<Expr> { Ok(Expr::new(ExprKind::Literal(kind), position)) };

        match &token.kind {
            TokenKind::Number(text) => {
                self.pos += 1;
                literal(Literal::Number(parse_number(text, token)?))
            }
            TokenKind::Str(value) => {
                self.pos += 1;
                literal(Literal::Str(value.clone()))
            }
            TokenKind::Address(text) => {
                self.pos += 1;
                let address = text.parse::<Address>().map_err(|e| invalid_literal(token, e))?;
                literal(Literal::Address(address))
            }
            TokenKind::HexBytes(digits) => {
                self.pos += 1;
                let bytes = hex::decode(digits).map_err(|e| invalid_literal(token, e))?;
                literal(Literal::HexBytes(bytes))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.pos += 1;
                literal(Literal::Bool(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.pos += 1;
                literal(Literal::Bool(false))
            }
            TokenKind::Keyword(Keyword::Reveal) => {
                self.pos += 1;
                self.expect_punct(Punct::LParen)?;
                let inner = self.expr()?;
                self.expect_punct(Punct::RParen)?;
                Ok(Expr::new(ExprKind::Reveal(Box::new(inner)), position))
            }
            TokenKind::Identifier(name) => {
                self.pos += 1;
                if self.eat_punct(Punct::LParen) {
                    let args = self.list(Punct::RParen, Self::expr)?;
                    let callee = Ident::new(name.clone(), position);
                    Ok(Expr::new(ExprKind::Call { callee, args }, position))
                } else {
                    Ok(Expr::new(ExprKind::Ident(name.clone()), position))
                }
            }
            TokenKind::Punct(Punct::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect_punct(Punct::RParen)?;
                Ok(inner)
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.pos += 1;
                let elements = self.list(Punct::RBracket, Self::expr)?;
                Ok(Expr::new(ExprKind::Array(elements), position))
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

fn parse_number(text: &str, token: &Token) -> PResult<U256> {
    let parsed = match text.strip_prefix("0x") {
        Some(digits) => U256::from_str_radix(digits, 16),
        None => U256::from_str_radix(text, 10),
    };
    parsed.map_err(|_| ParseError::InvalidLiteral {
        literal: token.lexeme.clone(),
        reason: "value does not fit in 256 bits".to_string(),
        position: token.position,
    })
}

fn invalid_literal(token: &Token, reason: impl std::fmt::Display) -> ParseError {
    ParseError::InvalidLiteral {
        literal: token.lexeme.clone(),
        reason: reason.to_string(),
        position: token.position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(source: &str) -> PResult<ContractDecl> {
        parse_tokens(&tokenize(source).unwrap())
    }

    fn first_function(contract: &ContractDecl) -> &FunctionDecl {
        contract.functions().next().unwrap()
    }

    #[test]
    fn test_precedence_climbing() {
        let contract = parse("contract C { function f() { x = a + b * c; } }").unwrap();
        let StmtKind::Assign { value, .. } = &first_function(&contract).body[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { op: BinaryOp::Add, rhs, .. } = &value.kind else {
            panic!("expected addition at the root");
        };
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_left_associative_subtraction() {
        let contract = parse("contract C { function f() { x = a - b - c; } }").unwrap();
        let StmtKind::Assign { value, .. } = &first_function(&contract).body[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { lhs, rhs, .. } = &value.kind else { panic!("expected binary") };
        assert!(matches!(lhs.kind, ExprKind::Binary { op: BinaryOp::Sub, .. }));
        assert_eq!(rhs.as_ident(), Some("c"));
    }

    #[test]
    fn test_compound_assignment_desugars() {
        let contract = parse("contract C { function f() { x += 1; } }").unwrap();
        let StmtKind::Assign { target, value } = &first_function(&contract).body[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(target.as_ident(), Some("x"));
        assert!(matches!(value.kind, ExprKind::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn test_parenthesized_return_is_not_a_tuple() {
        let contract =
            parse("contract C { function f() returns (uint256) { return (a + b) * c; } }").unwrap();
        let StmtKind::Return(values) = &first_function(&contract).body[0].kind else {
            panic!("expected return");
        };
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_tuple_return() {
        let contract = parse(
            "contract C { function f() returns (uint256, uint256) { return (a, b); } }",
        )
        .unwrap();
        let StmtKind::Return(values) = &first_function(&contract).body[0].kind else {
            panic!("expected return");
        };
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_number_too_large() {
        let huge = "1".repeat(80);
        let err = parse(&format!("contract C {{ function f() {{ x = {huge}; }} }}")).unwrap_err();
        assert!(matches!(err, ParseError::InvalidLiteral { .. }));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = parse("contract C { } contract D { }").unwrap_err();
        assert!(matches!(err, ParseError::Unexpected { .. }));
    }
}
