use super::*;
use crate::diagnostic::{DiagnosticOptions, StoredDiagnostics};

fn lex(input: &str) -> (Vec<Token>, StoredDiagnostics) {
    let stored = StoredDiagnostics::new();
    let mut diag = DiagnosticEngine::new(DiagnosticOptions::default(), Box::new(stored.clone()));
    let tokens = Lexer::new(input, "test.c", &mut diag).tokenize();
    (tokens, stored)
}

fn kinds(input: &str) -> Vec<TokenKind> {
    lex(input).0.into_iter().map(|t| t.kind).collect()
}

#[test]
fn test_keywords_identifiers_and_punctuators() {
    assert_eq!(
        kinds("int main(void) { return x <<= 2; }"),
        vec![
            TokenKind::Int,
            TokenKind::Identifier("main".into()),
            TokenKind::LeftParen,
            TokenKind::Void,
            TokenKind::RightParen,
            TokenKind::LeftBrace,
            TokenKind::Return,
            TokenKind::Identifier("x".into()),
            TokenKind::LeftShiftAssign,
            TokenKind::IntegerConstant {
                value: 2,
                unsigned: false,
                long: false
            },
            TokenKind::Semicolon,
            TokenKind::RightBrace,
            TokenKind::EndOfFile,
        ]
    );
}

#[test]
fn test_integer_constants() {
    assert_eq!(
        kinds("0x1F 017 42ul 0b101"),
        vec![
            TokenKind::IntegerConstant {
                value: 31,
                unsigned: false,
                long: false
            },
            TokenKind::IntegerConstant {
                value: 15,
                unsigned: false,
                long: false
            },
            TokenKind::IntegerConstant {
                value: 42,
                unsigned: true,
                long: true
            },
            TokenKind::IntegerConstant {
                value: 5,
                unsigned: false,
                long: false
            },
            TokenKind::EndOfFile,
        ]
    );
}

#[test]
fn test_string_and_char_escapes() {
    assert_eq!(
        kinds(r#""a\n\x41\101" '\0' '\''"#),
        vec![
            TokenKind::StringLiteral(b"a\nAA".to_vec()),
            TokenKind::CharacterConstant(0),
            TokenKind::CharacterConstant(39),
            TokenKind::EndOfFile,
        ]
    );
}

#[test]
fn test_line_markers_set_locations() {
    let (tokens, stored) = lex("# 1 \"main.c\"\nint a;\n# 7 \"inc.h\"\n\nlong b;\n#pragma weak a\n");
    assert!(stored.diagnostics().is_empty());
    let int_loc = &tokens[0].loc;
    assert_eq!((int_loc.file.as_str(), int_loc.line, int_loc.column), ("main.c", 1, 1));
    let long_loc = &tokens[3].loc;
    assert_eq!((long_loc.file.as_str(), long_loc.line), ("inc.h", 8));
    assert_eq!(tokens.last().map(|t| &t.kind), Some(&TokenKind::EndOfFile));
}

#[test]
fn test_lexical_errors() {
    let (_, stored) = lex("double d = 1.5; char *s = \"open\n@");
    assert_eq!(
        stored.messages(),
        vec![
            "error: floating-point types are not supported",
            "error: missing terminating \" character",
            "error: invalid character '@' in source",
        ]
    );
}
