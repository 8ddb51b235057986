//! Tests for the lexer

use veil_compiler::token::{Keyword, Operator, Punct};
use veil_compiler::{tokenize, Position, TokenKind};

fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
}

// ============================================================================
// TOKEN STREAM TESTS
// ============================================================================

#[test]
fn test_public_mapping_declaration() {
    let tokens = kinds("contract C { mapping(address => bytes32) public m; }");
    assert_eq!(
        tokens,
        vec![
            TokenKind::Keyword(Keyword::Contract),
            TokenKind::Identifier("C".into()),
            TokenKind::Punct(Punct::LBrace),
            TokenKind::Keyword(Keyword::Mapping),
            TokenKind::Punct(Punct::LParen),
            TokenKind::Keyword(Keyword::Address),
            TokenKind::Operator(Operator::FatArrow),
            TokenKind::Keyword(Keyword::Bytes(32)),
            TokenKind::Punct(Punct::RParen),
            TokenKind::Keyword(Keyword::Public),
            TokenKind::Identifier("m".into()),
            TokenKind::Punct(Punct::Semicolon),
            TokenKind::Punct(Punct::RBrace),
        ]
    );
}

#[test]
fn test_mpc_return_arrow() {
    let tokens = kinds("mpc function f() -> uint256");
    assert_eq!(tokens[5], TokenKind::Operator(Operator::Arrow));
    assert_eq!(tokens[6], TokenKind::Keyword(Keyword::Uint(256)));
}

#[test]
fn test_circuit_keywords() {
    assert_eq!(
        kinds("circuit private witness public input output constraint proof"),
        vec![
            TokenKind::Keyword(Keyword::Circuit),
            TokenKind::Keyword(Keyword::Private),
            TokenKind::Keyword(Keyword::Witness),
            TokenKind::Keyword(Keyword::Public),
            TokenKind::Keyword(Keyword::Input),
            TokenKind::Keyword(Keyword::Output),
            TokenKind::Keyword(Keyword::Constraint),
            TokenKind::Keyword(Keyword::Proof),
        ]
    );
}

#[test]
fn test_literals() {
    let address = format!("0x{}", "0".repeat(39) + "1");
    let source = format!(r#"42 0xff {address} hex"deadBEEF" "say \"hi\"\n""#);
    assert_eq!(
        kinds(&source),
        vec![
            TokenKind::Number("42".into()),
            TokenKind::Number("0xff".into()),
            TokenKind::Address(address.clone()),
            TokenKind::HexBytes("deadBEEF".into()),
            TokenKind::Str("say \"hi\"\n".into()),
        ]
    );
}

#[test]
fn test_compound_operators_take_longest_match() {
    assert_eq!(
        kinds("a += b -= c *= d == e != f <= g >= h && i || !j"),
        vec![
            TokenKind::Identifier("a".into()),
            TokenKind::Operator(Operator::PlusAssign),
            TokenKind::Identifier("b".into()),
            TokenKind::Operator(Operator::MinusAssign),
            TokenKind::Identifier("c".into()),
            TokenKind::Operator(Operator::StarAssign),
            TokenKind::Identifier("d".into()),
            TokenKind::Operator(Operator::EqEq),
            TokenKind::Identifier("e".into()),
            TokenKind::Operator(Operator::NotEq),
            TokenKind::Identifier("f".into()),
            TokenKind::Operator(Operator::Le),
            TokenKind::Identifier("g".into()),
            TokenKind::Operator(Operator::Ge),
            TokenKind::Identifier("h".into()),
            TokenKind::Operator(Operator::AndAnd),
            TokenKind::Identifier("i".into()),
            TokenKind::Operator(Operator::OrOr),
            TokenKind::Operator(Operator::Bang),
            TokenKind::Identifier("j".into()),
        ]
    );
}

#[test]
fn test_comments_produce_no_tokens() {
    let source = "contract /* inline */ C // trailing\n{ }";
    assert_eq!(kinds(source).len(), 4);
}

#[test]
fn test_token_positions() {
    let tokens = tokenize("contract C {\n    uint256 x;\n}").unwrap();
    assert_eq!(tokens[3].lexeme, "uint256");
    assert_eq!(tokens[3].position, Position::new(2, 5));
    assert_eq!(tokens[4].position, Position::new(2, 13));
}

// ============================================================================
// LEXICAL ERROR TESTS
// ============================================================================

#[test]
fn test_ket_literal_is_rejected() {
    let err = tokenize("x = |0>;").unwrap_err();
    assert_eq!(err.found, '|');
    assert_eq!(err.position, Position::new(1, 5));
}

#[test]
fn test_single_ampersand_is_rejected() {
    let err = tokenize("a & b").unwrap_err();
    assert_eq!(err.found, '&');
}

#[test]
fn test_unknown_character() {
    let err = tokenize("contract C { # }").unwrap_err();
    assert_eq!(err.found, '#');
    assert_eq!(err.position, Position::new(1, 14));
    assert!(err.to_string().contains("Lexical error at 1:14"));
}

#[test]
fn test_unterminated_string_reports_start() {
    let err = tokenize("require(x, \"never closed").unwrap_err();
    assert_eq!(err.position, Position::new(1, 12));
    assert_eq!(err.found, '"');
}

#[test]
fn test_first_error_aborts() {
    let err = tokenize("@ $").unwrap_err();
    assert_eq!(err.found, '@');
}
