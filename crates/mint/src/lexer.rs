//! The lexer: byte stream to token stream.
//!
//! Tokens carry their source span; string-ish tokens additionally leave their
//! decoded bytes in [`Lexer::token_bytes`]. Interpolated strings are delivered
//! as an [`Token::IstringStart`] marker, alternating [`Token::StringSegment`]
//! and expression tokens, and a closing [`Token::IstringEnd`]; the parser
//! reassembles them into a concatenation.

use strum::IntoStaticStr;

use crate::{
    source::{BufferId, Location, TextBuffer},
    tokens::{Token, lookup_keyword},
};

/// Lexical error categories, reported alongside [`Token::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LexError {
    IllegalChar,
    UnterminatedString,
    MalformedEscapeSequence,
    InvalidUnicodeChar,
}

impl LexError {
    pub fn message(self) -> &'static str {
        match self {
            Self::IllegalChar => "Illegal character",
            Self::UnterminatedString => "Unterminated string",
            Self::MalformedEscapeSequence => "Malformed escape sequence",
            Self::InvalidUnicodeChar => "Invalid unicode character",
        }
    }
}

/// Scanner state: either ordinary token scanning, the text portion of an
/// interpolated string, or an embedded `${...}` expression (brace depth
/// tracked so dict literals inside interpolations work).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    IstringText,
    IstringExpr { depth: u32 },
}

pub struct Lexer<'a> {
    buffer: BufferId,
    text: &'a [u8],
    pos: usize,
    token_begin: usize,
    token_value: Vec<u8>,
    line_break_before: bool,
    error: Option<LexError>,
    /// Interpolation mode stack; empty means normal scanning.
    modes: Vec<Mode>,
    /// A text segment scanned before the first `$` of an interpolated
    /// string, waiting to be emitted after `IstringStart`.
    pending_segment: Option<Vec<u8>>,
}

fn is_name_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_name_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

impl<'a> Lexer<'a> {
    pub fn new(buffer_id: BufferId, buffer: &'a TextBuffer) -> Self {
        Self {
            buffer: buffer_id,
            text: buffer.text(),
            pos: 0,
            token_begin: 0,
            token_value: Vec::new(),
            line_break_before: false,
            error: None,
            modes: Vec::new(),
            pending_segment: None,
        }
    }

    /// The span of the most recently returned token.
    pub fn token_location(&self) -> Location {
        Location::new(self.buffer, self.token_begin as u32, self.pos as u32)
    }

    /// Decoded bytes of the most recent ident/number/string token.
    pub fn token_bytes(&self) -> &[u8] {
        &self.token_value
    }

    /// Decoded text of the most recent token (lossy for non-UTF-8 escapes).
    pub fn token_text(&self) -> std::borrow::Cow<'a, str> {
        // The value buffer outlives only this call; copy out.
        std::borrow::Cow::Owned(String::from_utf8_lossy(&self.token_value).into_owned())
    }

    /// True when a line break (or comment) was passed before the current
    /// token. The parser uses this as a soft separator inside literals.
    pub fn line_break_before(&self) -> bool {
        self.line_break_before
    }

    pub fn error_code(&self) -> Option<LexError> {
        self.error
    }

    #[inline]
    fn ch(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    #[inline]
    fn peek(&self, ahead: usize) -> Option<u8> {
        self.text.get(self.pos + ahead).copied()
    }

    pub fn next(&mut self) -> Token {
        match self.modes.last() {
            None => self.next_normal(true),
            Some(Mode::IstringText) => self.next_istring_text(),
            Some(Mode::IstringExpr { .. }) => self.next_istring_expr(),
        }
    }

    /// Ordinary scanning: skip whitespace and comments, then read one token.
    fn next_normal(&mut self, track_line_breaks: bool) -> Token {
        if track_line_breaks {
            self.line_break_before = false;
        }
        loop {
            match self.ch() {
                None => {
                    self.token_begin = self.pos;
                    return Token::End;
                }
                Some(b' ' | b'\t' | 0x08) => self.pos += 1,
                Some(b'\n') => {
                    self.pos += 1;
                    self.line_break_before = true;
                }
                Some(b'\r') => {
                    self.pos += 1;
                    if self.ch() == Some(b'\n') {
                        self.pos += 1;
                    }
                    self.line_break_before = true;
                }
                Some(b'#') => {
                    while let Some(c) = self.ch() {
                        if c == b'\n' || c == b'\r' {
                            break;
                        }
                        self.pos += 1;
                    }
                    self.line_break_before = true;
                }
                Some(_) => break,
            }
        }
        self.token_begin = self.pos;
        self.read_token()
    }

    fn read_token(&mut self) -> Token {
        let ch = match self.ch() {
            Some(c) => c,
            None => return Token::End,
        };

        // Identifier or keyword. A ':' joins a project-qualified name only
        // when it sits directly between name characters (`proj:name`).
        if is_name_start(ch) {
            self.token_value.clear();
            let mut seen_colon = false;
            while let Some(c) = self.ch() {
                if is_name_char(c) {
                    self.token_value.push(c);
                    self.pos += 1;
                } else if c == b':'
                    && !seen_colon
                    && self.peek(1).is_some_and(is_name_start)
                {
                    seen_colon = true;
                    self.token_value.push(c);
                    self.pos += 1;
                } else {
                    break;
                }
            }
            if !seen_colon {
                let ident = std::str::from_utf8(&self.token_value).unwrap_or("");
                if let Some(kw) = lookup_keyword(ident) {
                    return kw;
                }
            }
            return Token::Ident;
        }

        if ch.is_ascii_digit() || ch == b'.' {
            return self.read_number();
        }

        match ch {
            b':' => self.single(Token::Colon),
            b';' => self.single(Token::Semi),
            b',' => self.single(Token::Comma),
            b'(' => self.single(Token::LParen),
            b')' => self.single(Token::RParen),
            b'[' => self.single(Token::LBracket),
            b']' => self.single(Token::RBracket),
            b'{' => self.single(Token::LBrace),
            b'}' => self.single(Token::RBrace),
            b'*' => self.single(Token::Star),
            b'/' => self.single(Token::Slash),
            b'%' => self.single(Token::Percent),
            b'-' => self.single(Token::Minus),
            b'+' => {
                self.pos += 1;
                if self.ch() == Some(b'+') {
                    self.pos += 1;
                    if self.ch() == Some(b'=') {
                        self.pos += 1;
                        return Token::DoublePlusAssign;
                    }
                    return Token::DoublePlus;
                }
                Token::Plus
            }
            b'=' => {
                self.pos += 1;
                match self.ch() {
                    Some(b'=') => {
                        self.pos += 1;
                        Token::Equal
                    }
                    Some(b'>') => {
                        self.pos += 1;
                        Token::MapsTo
                    }
                    _ => Token::Assign,
                }
            }
            b'!' => {
                self.pos += 1;
                if self.ch() == Some(b'=') {
                    self.pos += 1;
                    return Token::NotEqual;
                }
                Token::Exclam
            }
            b'<' => {
                self.pos += 1;
                if self.ch() == Some(b'=') {
                    self.pos += 1;
                    return Token::LessEqual;
                }
                Token::Less
            }
            b'>' => {
                self.pos += 1;
                if self.ch() == Some(b'=') {
                    self.pos += 1;
                    return Token::GreaterEqual;
                }
                Token::Greater
            }
            b'\'' => self.read_plain_string(b'\''),
            b'"' => self.read_dq_string(),
            _ => {
                self.token_value.clear();
                self.token_value.push(ch);
                self.pos += 1;
                self.error = Some(LexError::IllegalChar);
                Token::Error
            }
        }
    }

    fn single(&mut self, tok: Token) -> Token {
        self.pos += 1;
        tok
    }

    fn read_number(&mut self) -> Token {
        self.token_value.clear();
        let mut is_float = false;

        // Hex literal
        if self.ch() == Some(b'0') && matches!(self.peek(1), Some(b'x' | b'X')) {
            self.token_value.extend_from_slice(b"0x");
            self.pos += 2;
            while let Some(c) = self.ch() {
                if c.is_ascii_hexdigit() {
                    self.token_value.push(c);
                    self.pos += 1;
                } else if c == b'_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            return Token::Integer;
        }

        while let Some(c) = self.ch() {
            if c.is_ascii_digit() {
                self.token_value.push(c);
                self.pos += 1;
            } else if c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }

        if self.ch() == Some(b'.') {
            // A dot with no digits on either side is just the dot token.
            if self.token_value.is_empty() && !self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
                return Token::Dot;
            }
            self.pos += 1;
            is_float = true;
            self.token_value.push(b'.');
            while let Some(c) = self.ch() {
                if c.is_ascii_digit() {
                    self.token_value.push(c);
                    self.pos += 1;
                } else if c == b'_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        if matches!(self.ch(), Some(b'e' | b'E')) {
            is_float = true;
            self.token_value.push(b'e');
            self.pos += 1;
            if matches!(self.ch(), Some(b'+' | b'-')) {
                self.token_value.push(self.ch().unwrap_or(b'+'));
                self.pos += 1;
            }
            while let Some(c) = self.ch() {
                if c.is_ascii_digit() {
                    self.token_value.push(c);
                    self.pos += 1;
                } else if c == b'_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        if is_float { Token::Float } else { Token::Integer }
    }

    /// Single-quoted strings: no interpolation, escapes allowed.
    fn read_plain_string(&mut self, quote: u8) -> Token {
        self.pos += 1;
        self.token_value.clear();
        loop {
            match self.ch() {
                None => {
                    self.error = Some(LexError::UnterminatedString);
                    return Token::Error;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Token::SqString;
                }
                Some(b'\\') => {
                    if let Err(e) = self.read_escape() {
                        self.error = Some(e);
                        return Token::Error;
                    }
                }
                Some(c) if c >= b' ' => {
                    self.token_value.push(c);
                    self.pos += 1;
                }
                Some(_) => {
                    self.error = Some(LexError::MalformedEscapeSequence);
                    return Token::Error;
                }
            }
        }
    }

    /// Double-quoted strings: scans text until either the closing quote (a
    /// plain string token) or a `$` interpolation marker, in which case the
    /// scanned prefix becomes the first segment and `IstringStart` is
    /// returned.
    fn read_dq_string(&mut self) -> Token {
        self.pos += 1;
        self.token_value.clear();
        loop {
            match self.ch() {
                None => {
                    self.error = Some(LexError::UnterminatedString);
                    return Token::Error;
                }
                Some(b'"') => {
                    self.pos += 1;
                    return Token::DqString;
                }
                Some(b'$') => {
                    if self.peek(1) == Some(b'$') {
                        self.token_value.push(b'$');
                        self.pos += 2;
                        continue;
                    }
                    // Switch to interpolation mode; the prefix (possibly
                    // empty) is emitted as the first segment.
                    self.modes.push(Mode::IstringText);
                    if self.token_value.is_empty() {
                        self.pending_segment = None;
                    } else {
                        self.pending_segment = Some(std::mem::take(&mut self.token_value));
                    }
                    return Token::IstringStart;
                }
                Some(b'\\') => {
                    if let Err(e) = self.read_escape() {
                        self.error = Some(e);
                        return Token::Error;
                    }
                }
                Some(c) if c >= b' ' => {
                    self.token_value.push(c);
                    self.pos += 1;
                }
                Some(_) => {
                    self.error = Some(LexError::MalformedEscapeSequence);
                    return Token::Error;
                }
            }
        }
    }

    /// Text portion of an interpolated string, after `IstringStart`.
    fn next_istring_text(&mut self) -> Token {
        self.line_break_before = false;
        self.token_begin = self.pos;
        if let Some(segment) = self.pending_segment.take() {
            self.token_value = segment;
            return Token::StringSegment;
        }
        self.token_value.clear();
        loop {
            match self.ch() {
                None => {
                    self.modes.pop();
                    self.error = Some(LexError::UnterminatedString);
                    return Token::Error;
                }
                Some(b'"') => {
                    if self.token_value.is_empty() {
                        self.pos += 1;
                        self.modes.pop();
                        return Token::IstringEnd;
                    }
                    // Emit the final segment; the quote is handled next call.
                    return Token::StringSegment;
                }
                Some(b'$') => {
                    if self.peek(1) == Some(b'$') {
                        self.token_value.push(b'$');
                        self.pos += 2;
                        continue;
                    }
                    if !self.token_value.is_empty() {
                        // Emit text first; re-handle `$` on the next call.
                        return Token::StringSegment;
                    }
                    self.pos += 1;
                    match self.ch() {
                        Some(b'{') => {
                            self.pos += 1;
                            self.modes.push(Mode::IstringExpr { depth: 1 });
                            return self.next_istring_expr();
                        }
                        Some(c) if is_name_start(c) => {
                            self.token_begin = self.pos;
                            self.token_value.clear();
                            while let Some(c) = self.ch() {
                                if is_name_char(c) {
                                    self.token_value.push(c);
                                    self.pos += 1;
                                } else {
                                    break;
                                }
                            }
                            return Token::Ident;
                        }
                        _ => {
                            self.error = Some(LexError::MalformedEscapeSequence);
                            return Token::Error;
                        }
                    }
                }
                Some(b'\\') => {
                    if let Err(e) = self.read_escape() {
                        self.error = Some(e);
                        return Token::Error;
                    }
                }
                Some(c) if c >= b' ' => {
                    self.token_value.push(c);
                    self.pos += 1;
                }
                Some(_) => {
                    self.error = Some(LexError::MalformedEscapeSequence);
                    return Token::Error;
                }
            }
        }
    }

    /// Inside `${...}`: ordinary tokens, with brace depth tracked so the
    /// closing brace returns to text mode without being emitted.
    fn next_istring_expr(&mut self) -> Token {
        let tok = self.next_normal(false);
        match tok {
            Token::LBrace => {
                if let Some(Mode::IstringExpr { depth }) = self.modes.last_mut() {
                    *depth += 1;
                }
                tok
            }
            Token::RBrace => {
                let done = match self.modes.last_mut() {
                    Some(Mode::IstringExpr { depth }) => {
                        *depth -= 1;
                        *depth == 0
                    }
                    _ => false,
                };
                if done {
                    self.modes.pop();
                    return self.next_istring_text();
                }
                tok
            }
            Token::End => {
                self.modes.clear();
                self.error = Some(LexError::UnterminatedString);
                Token::Error
            }
            _ => tok,
        }
    }

    /// Decodes one backslash escape into the value buffer. The cursor sits
    /// on the backslash when called.
    fn read_escape(&mut self) -> Result<(), LexError> {
        self.pos += 1;
        let ch = self.ch().ok_or(LexError::UnterminatedString)?;
        self.pos += 1;
        match ch {
            b'0' => self.token_value.push(0),
            b'\\' => self.token_value.push(b'\\'),
            b'\'' => self.token_value.push(b'\''),
            b'"' => self.token_value.push(b'"'),
            b'r' => self.token_value.push(b'\r'),
            b'n' => self.token_value.push(b'\n'),
            b't' => self.token_value.push(b'\t'),
            b'b' => self.token_value.push(0x08),
            b'v' => self.token_value.push(0x0b),
            b'x' => {
                let val = self.read_hex_digits(2)?;
                self.token_value.push(val as u8);
            }
            b'u' => {
                let val = self.read_hex_digits(4)?;
                self.encode_unicode(val)?;
            }
            b'U' => {
                let val = self.read_hex_digits(8)?;
                self.encode_unicode(val)?;
            }
            other => {
                // Unknown escapes pass the character through, as the
                // original scanner did.
                self.token_value.push(other);
            }
        }
        Ok(())
    }

    /// Reads up to `max` hex digits (at least one) and returns their value.
    fn read_hex_digits(&mut self, max: usize) -> Result<u32, LexError> {
        let mut count = 0;
        let mut value: u32 = 0;
        while count < max {
            match self.ch() {
                Some(c) if c.is_ascii_hexdigit() => {
                    value = value * 16 + u32::from((c as char).to_digit(16).unwrap_or(0));
                    self.pos += 1;
                    count += 1;
                }
                _ => break,
            }
        }
        if count == 0 {
            return Err(LexError::MalformedEscapeSequence);
        }
        Ok(value)
    }

    /// Encodes a code point as UTF-8 into the value buffer.
    fn encode_unicode(&mut self, val: u32) -> Result<(), LexError> {
        let ch = char::from_u32(val).ok_or(LexError::InvalidUnicodeChar)?;
        let mut buf = [0u8; 4];
        self.token_value
            .extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceMap;

    fn lex_all(src: &str) -> Vec<(Token, Vec<u8>)> {
        let mut sources = SourceMap::new();
        let id = sources.add(TextBuffer::new("test.mint", src.as_bytes().to_vec()));
        let mut lexer = Lexer::new(id, sources.get(id));
        let mut out = Vec::new();
        loop {
            let tok = lexer.next();
            out.push((tok, lexer.token_bytes().to_vec()));
            if tok == Token::End || tok == Token::Error {
                return out;
            }
        }
    }

    fn kinds(src: &str) -> Vec<Token> {
        lex_all(src).into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn single_tokens_round_trip() {
        let cases: &[(&str, Token)] = &[
            ("name", Token::Ident),
            ("42", Token::Integer),
            ("0x2a", Token::Integer),
            ("1.5", Token::Float),
            ("2e10", Token::Float),
            ("'sq'", Token::SqString),
            ("\"dq\"", Token::DqString),
            ("import", Token::Import),
            ("from", Token::From),
            ("as", Token::As),
            ("project", Token::Project),
            ("option", Token::Option),
            ("param", Token::Param),
            ("cached", Token::Cached),
            ("do", Token::Do),
            ("let", Token::Let),
            ("if", Token::If),
            ("else", Token::Else),
            ("and", Token::And),
            ("or", Token::Or),
            ("not", Token::Not),
            ("in", Token::In),
            ("super", Token::Super),
            ("self", Token::SelfTok),
            ("true", Token::True),
            ("false", Token::False),
            ("undefined", Token::Undefined),
            ("any", Token::TypenameAny),
            ("bool", Token::TypenameBool),
            ("int", Token::TypenameInt),
            ("float", Token::TypenameFloat),
            ("string", Token::TypenameString),
            ("list", Token::TypenameList),
            ("dict", Token::TypenameDict),
            ("(", Token::LParen),
            (")", Token::RParen),
            ("[", Token::LBracket),
            ("]", Token::RBracket),
            ("{", Token::LBrace),
            ("}", Token::RBrace),
            (",", Token::Comma),
            (";", Token::Semi),
            (":", Token::Colon),
            (".", Token::Dot),
            ("=", Token::Assign),
            ("++=", Token::DoublePlusAssign),
            ("=>", Token::MapsTo),
            ("+", Token::Plus),
            ("++", Token::DoublePlus),
            ("-", Token::Minus),
            ("*", Token::Star),
            ("/", Token::Slash),
            ("%", Token::Percent),
            ("==", Token::Equal),
            ("!=", Token::NotEqual),
            ("<", Token::Less),
            ("<=", Token::LessEqual),
            (">", Token::Greater),
            (">=", Token::GreaterEqual),
            ("!", Token::Exclam),
        ];
        for &(src, expected) in cases {
            let toks = kinds(src);
            assert_eq!(
                toks,
                vec![expected, Token::End],
                "lexing {src:?} should yield exactly one {expected:?}"
            );
        }
    }

    #[test]
    fn hex_and_unicode_escapes_decode_to_utf8() {
        let toks = lex_all(r#""\x41\u00AA""#);
        assert_eq!(toks[0].0, Token::DqString);
        assert_eq!(toks[0].1, vec![0x41, 0xC2, 0xAA]);
    }

    #[test]
    fn wide_unicode_escape_encodes_to_four_bytes() {
        let toks = lex_all(r#"'\U0001F600'"#);
        assert_eq!(toks[0].0, Token::SqString);
        assert_eq!(toks[0].1, "\u{1F600}".as_bytes().to_vec());
    }

    #[test]
    fn invalid_code_point_is_an_error() {
        let mut sources = SourceMap::new();
        let id = sources.add(TextBuffer::new("t", b"'\\UFFFFFFFF'".to_vec()));
        let mut lexer = Lexer::new(id, sources.get(id));
        assert_eq!(lexer.next(), Token::Error);
        assert_eq!(lexer.error_code(), Some(LexError::InvalidUnicodeChar));
    }

    #[test]
    fn project_qualified_ident_is_one_token() {
        let toks = lex_all("proj:name");
        assert_eq!(toks[0].0, Token::Ident);
        assert_eq!(toks[0].1, b"proj:name".to_vec());
    }

    #[test]
    fn colon_after_ident_stays_separate() {
        assert_eq!(
            kinds("x : int"),
            vec![Token::Ident, Token::Colon, Token::TypenameInt, Token::End]
        );
        assert_eq!(
            kinds("x: int"),
            vec![Token::Ident, Token::Colon, Token::TypenameInt, Token::End]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let mut sources = SourceMap::new();
        let id = sources.add(TextBuffer::new("t", b"'abc".to_vec()));
        let mut lexer = Lexer::new(id, sources.get(id));
        assert_eq!(lexer.next(), Token::Error);
        assert_eq!(lexer.error_code(), Some(LexError::UnterminatedString));
    }

    #[test]
    fn malformed_escape_is_an_error() {
        let mut sources = SourceMap::new();
        let id = sources.add(TextBuffer::new("t", b"'\\xzz'".to_vec()));
        let mut lexer = Lexer::new(id, sources.get(id));
        assert_eq!(lexer.next(), Token::Error);
        assert_eq!(lexer.error_code(), Some(LexError::MalformedEscapeSequence));
    }

    #[test]
    fn comments_and_line_breaks_set_flag() {
        let mut sources = SourceMap::new();
        let id = sources.add(TextBuffer::new("t", b"a # note\nb".to_vec()));
        let mut lexer = Lexer::new(id, sources.get(id));
        assert_eq!(lexer.next(), Token::Ident);
        assert!(!lexer.line_break_before());
        assert_eq!(lexer.next(), Token::Ident);
        assert!(lexer.line_break_before());
    }

    #[test]
    fn interpolated_string_produces_segments() {
        let toks = kinds(r#""a${x}b""#);
        assert_eq!(
            toks,
            vec![
                Token::IstringStart,
                Token::StringSegment,
                Token::Ident,
                Token::StringSegment,
                Token::IstringEnd,
                Token::End
            ]
        );
    }

    #[test]
    fn dollar_ident_form() {
        let toks = lex_all(r#""n=$count!""#);
        let kinds: Vec<Token> = toks.iter().map(|(t, _)| *t).collect();
        assert_eq!(
            kinds,
            vec![
                Token::IstringStart,
                Token::StringSegment,
                Token::Ident,
                Token::StringSegment,
                Token::IstringEnd,
                Token::End
            ]
        );
        assert_eq!(toks[2].1, b"count".to_vec());
        assert_eq!(toks[3].1, b"!".to_vec());
    }

    #[test]
    fn double_dollar_is_literal() {
        let toks = lex_all(r#""cost: $$5""#);
        assert_eq!(toks[0].0, Token::DqString);
        assert_eq!(toks[0].1, b"cost: $5".to_vec());
    }

    #[test]
    fn expression_tokens_inside_interpolation() {
        let toks = kinds(r#""v=${x + 1}""#);
        assert_eq!(
            toks,
            vec![
                Token::IstringStart,
                Token::StringSegment,
                Token::Ident,
                Token::Plus,
                Token::Integer,
                Token::IstringEnd,
                Token::End
            ]
        );
    }
}
