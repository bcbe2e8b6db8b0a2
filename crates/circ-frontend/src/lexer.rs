//! Token stream for the C subset this frontend accepts (§6 "Lexer token
//! contract"): identifiers, typename-eligible identifiers, integer/char/
//! string literals, the operator set a recursive-descent C parser needs, `@`
//! for a stage trigger, and `# <line> "<file>" <flag>` line-marker
//! directives. Built on `logos` the way the reference lexer crate in this
//! codebase's pack builds its own token enum: a private `LogosToken` that
//! gets mapped to a small public `Token`.

use crate::error::{FrontendError, FrontendResult};
use circ_core::error::{Location, LocationStack};
use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
enum LogosToken {
    #[token("void")]
    Void,
    #[token("char")]
    Char,
    #[token("short")]
    Short,
    #[token("int")]
    Int,
    #[token("long")]
    Long,
    #[token("unsigned")]
    Unsigned,
    #[token("signed")]
    Signed,
    #[token("struct")]
    Struct,
    #[token("union")]
    Union,
    #[token("enum")]
    Enum,
    #[token("typedef")]
    Typedef,
    #[token("static")]
    Static,
    #[token("extern")]
    Extern,
    #[token("const")]
    Const,
    #[token("sizeof")]
    Sizeof,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("for")]
    For,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),

    #[regex(r"0[xX][0-9a-fA-F]+[uUlL]*", |lex| lex.slice().to_owned())]
    #[regex(r"0[0-7]+[uUlL]*", |lex| lex.slice().to_owned())]
    #[regex(r"[0-9]+[uUlL]*", |lex| lex.slice().to_owned())]
    IntLit(String),

    #[regex(r"'([^'\\]|\\.)'", |lex| lex.slice().to_owned())]
    CharLit(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| lex.slice().to_owned())]
    StrLit(String),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,
    #[token("@")]
    At,

    #[token("<<=")]
    ShlEq,
    #[token(">>=")]
    ShrEq,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("&=")]
    AndEq,
    #[token("|=")]
    OrEq,
    #[token("^=")]
    XorEq,

    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Eq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
}

/// A token with its raw source line (1-based, before line-marker remapping).
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Void,
    Char,
    Short,
    Int,
    Long,
    Unsigned,
    Signed,
    Struct,
    Union,
    Enum,
    Typedef,
    Static,
    Extern,
    Const,
    Sizeof,
    If,
    Else,
    While,
    Do,
    For,
    Return,
    Break,
    Continue,
    Ident(String),
    IntLit(i64, IntSuffix),
    CharLit(i64),
    StrLit(Vec<u8>),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    Arrow,
    At,
    ShlEq,
    ShrEq,
    Shl,
    Shr,
    Le,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
    PlusPlus,
    MinusMinus,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AndEq,
    OrEq,
    XorEq,
    Lt,
    Gt,
    Eq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntSuffix {
    pub unsigned: bool,
    pub long_count: u8,
}

fn parse_int_lit(raw: &str) -> (i64, IntSuffix) {
    let mut suffix = IntSuffix::default();
    let mut digits = raw;
    while let Some(last) = digits.chars().last() {
        match last {
            'u' | 'U' => {
                suffix.unsigned = true;
                digits = &digits[..digits.len() - 1];
            }
            'l' | 'L' => {
                suffix.long_count += 1;
                digits = &digits[..digits.len() - 1];
            }
            _ => break,
        }
    }
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).unwrap_or(0)
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).unwrap_or(0)
    } else {
        digits.parse::<u64>().unwrap_or(0)
    };
    (value as i64, suffix)
}

fn unescape(body: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('t') => out.push(b'\t'),
            Some('r') => out.push(b'\r'),
            Some('0') => out.push(0),
            Some('\\') => out.push(b'\\'),
            Some('\'') => out.push(b'\''),
            Some('"') => out.push(b'"'),
            Some(other) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => {}
        }
    }
    out
}

/// One entry of a `# <line> "<file>" <flag>` directive: `at_line` is the raw
/// physical line the directive occupies; the remapped location takes effect
/// starting the line after it.
struct LineMarker {
    at_line: u32,
    location: Location,
}

fn scan_line_markers(src: &str) -> Vec<LineMarker> {
    let mut markers = Vec::new();
    for (idx, line) in src.lines().enumerate() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with('#') {
            continue;
        }
        let rest = trimmed[1..].trim_start();
        let mut parts = rest.splitn(2, '"');
        let Some(line_num_str) = parts.next() else { continue };
        let Ok(line_num) = line_num_str.trim().parse::<u32>() else { continue };
        let Some(file_and_flags) = parts.next() else { continue };
        let file = file_and_flags.split('"').next().unwrap_or("").to_owned();
        markers.push(LineMarker { at_line: idx as u32 + 1, location: Location { file, line: line_num } });
    }
    markers
}

/// Tokenizes `src` in full up front (no nested includes; `#include` is a
/// Non-goal), producing a flat token stream plus the `Location` each token's
/// physical line maps to under any `#line`-style directives seen so far.
pub struct Lexer {
    tokens: Vec<(Token, Location)>,
    pos: usize,
}

impl Lexer {
    pub fn tokenize(src: &str, file_name: &str) -> FrontendResult<Lexer> {
        let markers = scan_line_markers(src);
        let mut lex = LogosToken::lexer(src);
        let mut tokens = Vec::new();
        let mut current = Location { file: file_name.to_owned(), line: 1 };
        let mut next_marker = 0usize;

        while let Some(result) = lex.next() {
            let line = src[..lex.span().start].matches('\n').count() as u32 + 1;
            while next_marker < markers.len() && markers[next_marker].at_line <= line {
                current = markers[next_marker].location.clone();
                current.line = current.line.wrapping_add(line.saturating_sub(markers[next_marker].at_line));
                next_marker += 1;
            }
            let mut loc = current.clone();
            loc.line = current.line;

            let tok = match result {
                Ok(LogosToken::Void) => Token::Void,
                Ok(LogosToken::Char) => Token::Char,
                Ok(LogosToken::Short) => Token::Short,
                Ok(LogosToken::Int) => Token::Int,
                Ok(LogosToken::Long) => Token::Long,
                Ok(LogosToken::Unsigned) => Token::Unsigned,
                Ok(LogosToken::Signed) => Token::Signed,
                Ok(LogosToken::Struct) => Token::Struct,
                Ok(LogosToken::Union) => Token::Union,
                Ok(LogosToken::Enum) => Token::Enum,
                Ok(LogosToken::Typedef) => Token::Typedef,
                Ok(LogosToken::Static) => Token::Static,
                Ok(LogosToken::Extern) => Token::Extern,
                Ok(LogosToken::Const) => Token::Const,
                Ok(LogosToken::Sizeof) => Token::Sizeof,
                Ok(LogosToken::If) => Token::If,
                Ok(LogosToken::Else) => Token::Else,
                Ok(LogosToken::While) => Token::While,
                Ok(LogosToken::Do) => Token::Do,
                Ok(LogosToken::For) => Token::For,
                Ok(LogosToken::Return) => Token::Return,
                Ok(LogosToken::Break) => Token::Break,
                Ok(LogosToken::Continue) => Token::Continue,
                Ok(LogosToken::Ident(s)) => Token::Ident(s),
                Ok(LogosToken::IntLit(s)) => {
                    let (v, suf) = parse_int_lit(&s);
                    Token::IntLit(v, suf)
                }
                Ok(LogosToken::CharLit(s)) => {
                    let body = &s[1..s.len() - 1];
                    let bytes = unescape(body);
                    Token::CharLit(*bytes.first().unwrap_or(&0) as i64)
                }
                Ok(LogosToken::StrLit(s)) => {
                    let body = &s[1..s.len() - 1];
                    let mut bytes = unescape(body);
                    bytes.push(0);
                    Token::StrLit(bytes)
                }
                Ok(LogosToken::LParen) => Token::LParen,
                Ok(LogosToken::RParen) => Token::RParen,
                Ok(LogosToken::LBrace) => Token::LBrace,
                Ok(LogosToken::RBrace) => Token::RBrace,
                Ok(LogosToken::LBracket) => Token::LBracket,
                Ok(LogosToken::RBracket) => Token::RBracket,
                Ok(LogosToken::Semi) => Token::Semi,
                Ok(LogosToken::Comma) => Token::Comma,
                Ok(LogosToken::Dot) => Token::Dot,
                Ok(LogosToken::Arrow) => Token::Arrow,
                Ok(LogosToken::At) => Token::At,
                Ok(LogosToken::ShlEq) => Token::ShlEq,
                Ok(LogosToken::ShrEq) => Token::ShrEq,
                Ok(LogosToken::Shl) => Token::Shl,
                Ok(LogosToken::Shr) => Token::Shr,
                Ok(LogosToken::Le) => Token::Le,
                Ok(LogosToken::Ge) => Token::Ge,
                Ok(LogosToken::EqEq) => Token::EqEq,
                Ok(LogosToken::Ne) => Token::Ne,
                Ok(LogosToken::AndAnd) => Token::AndAnd,
                Ok(LogosToken::OrOr) => Token::OrOr,
                Ok(LogosToken::PlusPlus) => Token::PlusPlus,
                Ok(LogosToken::MinusMinus) => Token::MinusMinus,
                Ok(LogosToken::PlusEq) => Token::PlusEq,
                Ok(LogosToken::MinusEq) => Token::MinusEq,
                Ok(LogosToken::StarEq) => Token::StarEq,
                Ok(LogosToken::SlashEq) => Token::SlashEq,
                Ok(LogosToken::PercentEq) => Token::PercentEq,
                Ok(LogosToken::AndEq) => Token::AndEq,
                Ok(LogosToken::OrEq) => Token::OrEq,
                Ok(LogosToken::XorEq) => Token::XorEq,
                Ok(LogosToken::Lt) => Token::Lt,
                Ok(LogosToken::Gt) => Token::Gt,
                Ok(LogosToken::Eq) => Token::Eq,
                Ok(LogosToken::Plus) => Token::Plus,
                Ok(LogosToken::Minus) => Token::Minus,
                Ok(LogosToken::Star) => Token::Star,
                Ok(LogosToken::Slash) => Token::Slash,
                Ok(LogosToken::Percent) => Token::Percent,
                Ok(LogosToken::Amp) => Token::Amp,
                Ok(LogosToken::Pipe) => Token::Pipe,
                Ok(LogosToken::Caret) => Token::Caret,
                Ok(LogosToken::Tilde) => Token::Tilde,
                Ok(LogosToken::Bang) => Token::Bang,
                Err(()) => {
                    let mut locs = LocationStack::new();
                    locs.push(loc.file.clone(), loc.line);
                    return Err(FrontendError::Fatal(circ_core::error::FatalError::new(
                        format!("unrecognized token {:?}", lex.slice()),
                        locs,
                    )));
                }
            };
            tokens.push((tok, loc));
        }
        tokens.push((Token::Eof, current));
        Ok(Lexer { tokens, pos: 0 })
    }

    pub fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    pub fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].0
    }

    pub fn location(&self) -> Location {
        self.tokens[self.pos].1.clone()
    }

    pub fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].0.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_simple_declaration() {
        let lex = Lexer::tokenize("int x = 1 + 2;", "t.c").unwrap();
        assert_eq!(lex.tokens[0].0, Token::Int);
        assert_eq!(lex.tokens[1].0, Token::Ident("x".to_owned()));
        assert_eq!(lex.tokens[2].0, Token::Eq);
        assert_eq!(lex.tokens[3].0, Token::IntLit(1, IntSuffix::default()));
    }

    #[test]
    fn unsigned_long_suffix_is_recognized() {
        let lex = Lexer::tokenize("10UL", "t.c").unwrap();
        match &lex.tokens[0].0 {
            Token::IntLit(v, suf) => {
                assert_eq!(*v, 10);
                assert!(suf.unsigned);
                assert_eq!(suf.long_count, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn string_literal_is_nul_terminated() {
        let lex = Lexer::tokenize(r#""hi""#, "t.c").unwrap();
        match &lex.tokens[0].0 {
            Token::StrLit(bytes) => assert_eq!(bytes, b"hi\0"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn line_marker_remaps_reported_location() {
        let src = "int a;\n# 10 \"included.h\"\nint b;\n";
        let lex = Lexer::tokenize(src, "main.c").unwrap();
        // `int b;` is the 3rd physical line, one line after the marker.
        let b_tok_loc = lex.tokens.iter().find(|(t, _)| *t == Token::Ident("b".to_owned())).unwrap();
        assert_eq!(b_tok_loc.1.file, "included.h");
        assert_eq!(b_tok_loc.1.line, 11);
    }
}
