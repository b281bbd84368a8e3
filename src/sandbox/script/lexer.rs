//! Tokenizer for the sandbox scripting language.
//!
//! Indentation is turned into explicit `Indent` / `Dedent` tokens the way
//! Python does it; newlines inside brackets are ignored.
use super::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// f-string, kept raw; the parser splits it into literal and expression parts.
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

/// Longest operators first so that `**=` wins over `**` and `*`.
const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->", "+",
    "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
    at_line_start: bool,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
            at_line_start: true,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token { tok, line: self.line });
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            line: self.line,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        while self.pos < self.chars.len() {
            if self.at_line_start && self.depth == 0 {
                if self.handle_indentation()? {
                    continue;
                }
            }
            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push_newline();
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '0'..='9' => self.lex_number()?,
                '.' if matches!(self.peek_at(1), Some('0'..='9')) => self.lex_number()?,
                '"' | '\'' => {
                    let s = self.lex_string(false)?;
                    self.push(Tok::Str(s));
                }
                c if c.is_alphabetic() || c == '_' => self.lex_name_or_prefixed_string()?,
                _ => self.lex_operator()?,
            }
        }

        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    fn push_newline(&mut self) {
        match self.tokens.last() {
            None => {}
            Some(t) if t.tok == Tok::Newline || t.tok == Tok::Indent || t.tok == Tok::Dedent => {}
            Some(_) => self.push(Tok::Newline),
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    /// Measures leading whitespace of a logical line and emits indent tokens.
    /// Returns true when the line was blank or comment-only and got consumed.
    fn handle_indentation(&mut self) -> Result<bool, SyntaxError> {
        let mut width = 0;
        let mut p = self.pos;
        while let Some(&c) = self.chars.get(p) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' => {}
                _ => break,
            }
            p += 1;
        }
        match self.chars.get(p) {
            None => {
                self.pos = p;
                return Ok(true);
            }
            Some('\n') => {
                self.pos = p + 1;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                self.pos = p;
                self.skip_comment();
                return Ok(true);
            }
            _ => {}
        }
        self.pos = p;
        self.at_line_start = false;

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else if width < current {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn lex_number(&mut self) -> Result<(), SyntaxError> {
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.pos += 2;
            let start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit() || c == '_') {
                self.pos += 1;
            }
            let digits: String = self.chars[start..self.pos].iter().filter(|c| **c != '_').collect();
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| self.error("invalid hexadecimal literal"))?;
            self.push(Tok::Int(value));
            return Ok(());
        }

        let start = self.pos;
        let mut is_float = false;
        let mut seen_exp = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => self.pos += 1,
                '.' if !is_float => match self.peek_at(1) {
                    Some(n) if n.is_alphabetic() || n == '_' || n == '.' => break,
                    _ => {
                        is_float = true;
                        self.pos += 1;
                    }
                },
                'e' | 'E' if !seen_exp => {
                    let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
                    let digit_at = if sign { 2 } else { 1 };
                    if matches!(self.peek_at(digit_at), Some('0'..='9')) {
                        is_float = true;
                        seen_exp = true;
                        self.pos += digit_at;
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
        let text: String = self.chars[start..self.pos].iter().filter(|c| **c != '_').collect();
        if is_float {
            let value: f64 = text.parse().map_err(|_| self.error("invalid float literal"))?;
            self.push(Tok::Float(value));
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| self.error(format!("integer literal too large: {text}")))?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn lex_name_or_prefixed_string(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('"') | Some('\'')) {
            match name.to_ascii_lowercase().as_str() {
                "r" => {
                    let s = self.lex_string(true)?;
                    self.push(Tok::Str(s));
                    return Ok(());
                }
                "f" => {
                    let s = self.lex_string(false)?;
                    self.push(Tok::FStr(s));
                    return Ok(());
                }
                "rf" | "fr" => {
                    let s = self.lex_string(true)?;
                    self.push(Tok::FStr(s));
                    return Ok(());
                }
                "b" | "u" => {
                    let s = self.lex_string(false)?;
                    self.push(Tok::Str(s));
                    return Ok(());
                }
                _ => {}
            }
        }
        self.push(Tok::Name(name));
        Ok(())
    }

    fn lex_string(&mut self, raw: bool) -> Result<String, SyntaxError> {
        let quote = self.peek().ok_or_else(|| self.error("unexpected end of input"))?;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let c = self
                .peek()
                .ok_or_else(|| self.error("unterminated string literal"))?;
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
                out.push(c);
                self.pos += 1;
                continue;
            }
            if c == '\n' {
                if !triple {
                    return Err(self.error("unterminated string literal"));
                }
                self.line += 1;
                out.push(c);
                self.pos += 1;
                continue;
            }
            if c == '\\' {
                let next = self
                    .peek_at(1)
                    .ok_or_else(|| self.error("unterminated string literal"))?;
                if raw {
                    out.push('\\');
                    out.push(next);
                    self.pos += 2;
                    if next == '\n' {
                        self.line += 1;
                    }
                    continue;
                }
                self.pos += 2;
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    'x' => out.push(self.lex_hex_escape(2)?),
                    'u' => out.push(self.lex_hex_escape(4)?),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn lex_hex_escape(&mut self, len: usize) -> Result<char, SyntaxError> {
        let end = self.pos + len;
        if end > self.chars.len() {
            return Err(self.error("truncated escape sequence"));
        }
        let digits: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(format!("invalid escape sequence \\{digits}")))
    }

    fn lex_operator(&mut self) -> Result<(), SyntaxError> {
        for op in OPERATORS {
            let len = op.chars().count();
            if self.pos + len <= self.chars.len()
                && self.chars[self.pos..self.pos + len].iter().copied().eq(op.chars())
            {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(self.error(format!("invalid character '{c}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            toks("result = 2 ** 10"),
            vec![
                Tok::Name("result".into()),
                Tok::Op("="),
                Tok::Int(2),
                Tok::Op("**"),
                Tok::Int(10),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let t = toks("if x:\n    y = 1\nz = 2\n");
        assert!(t.contains(&Tok::Indent));
        assert!(t.contains(&Tok::Dedent));
        let indent = t.iter().position(|t| *t == Tok::Indent).unwrap();
        let dedent = t.iter().position(|t| *t == Tok::Dedent).unwrap();
        assert!(indent < dedent);
    }

    #[test]
    fn test_blank_and_comment_lines_do_not_indent() {
        let t = toks("x = 1\n\n    # comment\ny = 2\n");
        assert!(!t.contains(&Tok::Indent));
    }

    #[test]
    fn test_newlines_inside_brackets_ignored() {
        let t = toks("x = [1,\n     2]\n");
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 1);
        assert!(!t.contains(&Tok::Indent));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(toks(r#"'a\nb'"#)[0], Tok::Str("a\nb".into()));
        assert_eq!(toks(r#""it's""#)[0], Tok::Str("it's".into()));
        assert_eq!(toks(r#"r'\d+'"#)[0], Tok::Str("\\d+".into()));
    }

    #[test]
    fn test_triple_quoted_string_spans_lines() {
        let tokens = tokenize("s = \"\"\"a\nb\"\"\"\nx = 1").unwrap();
        assert_eq!(tokens[2].tok, Tok::Str("a\nb".into()));
        let x = tokens.iter().find(|t| t.tok == Tok::Name("x".into())).unwrap();
        assert_eq!(x.line, 3);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("1_000")[0], Tok::Int(1000));
        assert_eq!(toks("0xff")[0], Tok::Int(255));
        assert_eq!(toks("1.5")[0], Tok::Float(1.5));
        assert_eq!(toks("2e3")[0], Tok::Float(2000.0));
        assert_eq!(toks(".5")[0], Tok::Float(0.5));
    }

    #[test]
    fn test_attribute_dot_is_an_operator() {
        let t = toks("x.y");
        assert_eq!(t[1], Tok::Op("."));
    }

    #[test]
    fn test_fstring_token() {
        assert_eq!(toks("f'{x}!'")[0], Tok::FStr("{x}!".into()));
    }

    #[test]
    fn test_integer_literal_overflow() {
        let err = tokenize("99999999999999999999999").unwrap_err();
        assert!(err.message.contains("too large"));
    }

    #[test]
    fn test_bad_dedent() {
        let err = tokenize("if x:\n    y = 1\n  z = 2\n").unwrap_err();
        assert!(err.message.contains("unindent"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("x = 'abc").is_err());
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("x = 1 $ 2").unwrap_err();
        assert!(err.message.contains('$'));
    }
}
