use crate::{
    ast::{
        BlockStatement, BooleanLiteral, CommentStatement, ContentStatement, Expression, Hash,
        HashPair, MustacheStatement, NumberLiteral, Param, PartialStatement, PathExpression,
        Program, Statement, StringLiteral, SubExpression,
    },
    error::{ParseError, ParseErrorKind},
};

type ParseResult<T> = Result<T, ParseError>;

/// Characters that may never appear in a bare path segment.
const NON_ID_CHARS: &str = "!\"#%&'()*+,./;<=>@[\\]^`{|}~";

fn is_id_char(c: char) -> bool {
    !c.is_whitespace() && !NON_ID_CHARS.contains(c)
}

/// Characters allowed directly after a literal or a lone `.` segment.
fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '}' | ')' | '|' | '/' | '.' | '=')
}

/// Why a run of statements stopped.
enum Terminator {
    Eof,
    /// `{{/name}}`, with the position of its opening braces.
    Close {
        name: String,
        line: usize,
        column: usize,
    },
    /// `{{else}}` or `{{^}}`.
    Else,
    /// `{{else helper args}}`, which opens a chained block.
    ElseChain {
        expression: Expression,
        block_params: Vec<String>,
    },
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
    /// Every mustache is emitted unescaped.
    unescaped: bool,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, unescaped: bool) -> Self {
        Parser {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            unescaped,
        }
    }

    #[inline]
    fn current_column(&self) -> usize {
        self.pos.saturating_sub(self.line_start_pos).saturating_add(1)
    }

    #[inline]
    fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.line,
            column: self.current_column(),
            kind,
        }
    }

    /// Advances the parser position by char_len bytes, correctly handling
    /// multi-byte characters. Updates line and column numbers if a newline is
    /// encountered.
    #[inline]
    fn advance_by_char(&mut self, current_char: char, char_len: usize) {
        if current_char == '\n' {
            self.line = self.line.saturating_add(1);
            self.line_start_pos = self.pos.saturating_add(char_len);
        }
        self.pos = self.pos.saturating_add(char_len);
    }

    /// Advances the parser position by `len` bytes.
    /// This method assumes that the consumed string `s` does NOT contain newlines.
    /// If it can, line/column tracking will be incorrect. Used for fixed delimiters.
    #[inline]
    fn advance_bytes_no_newline(&mut self, len: usize) {
        self.pos = self.pos.saturating_add(len);
    }

    /// Advances over `len` bytes of arbitrary text, tracking newlines.
    fn advance_over(&mut self, len: usize) {
        let end = self.pos.saturating_add(len);
        while self.pos < end {
            match self.current_char() {
                Some(c) => self.advance_by_char(c, c.len_utf8()),
                None => break,
            }
        }
    }

    #[inline]
    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    #[inline]
    fn current_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// The character after the current one.
    #[inline]
    fn next_char(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    #[inline]
    fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or_default()
    }

    /// Input between two byte offsets taken from `pos`.
    #[inline]
    fn slice(&self, start: usize, end: usize) -> &'a str {
        self.input.get(start..end).unwrap_or_default()
    }

    fn peek(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    /// Multi-token peek which checks if the remaining input starts with the provided tokens, ignoring whitespace between.
    fn peek_n<const N: usize>(&self, tokens: [&str; N]) -> bool {
        let Some((first, others)) = tokens.split_first() else {
            return true;
        };
        if !self.peek(first) {
            return false;
        }

        let mut parser = Self {
            input: self.input,
            pos: self.pos.saturating_add(first.len()),
            line: self.line,
            line_start_pos: self.line_start_pos,
            unescaped: self.unescaped,
        };

        for token in others {
            parser.consume_whitespace();
            if !parser.peek(token) {
                return false;
            }
            parser.advance_bytes_no_newline(token.len());
        }
        true
    }

    /// Whether the input is `{{` followed by `keyword` as a whole word.
    fn peek_keyword(&self, keyword: &str) -> bool {
        let Some(rest) = self.rest().strip_prefix("{{") else {
            return false;
        };
        match rest.trim_start().strip_prefix(keyword) {
            Some(after) => after.starts_with(|c: char| c.is_whitespace() || c == '}'),
            None => false,
        }
    }

    /// Consume `s` if the remaining input starts with it.
    /// Assumes `s` does not contain newlines.
    fn consume(&mut self, s: &str) -> bool {
        if self.peek(s) {
            self.advance_bytes_no_newline(s.len());
            true
        } else {
            false
        }
    }

    fn consume_whitespace(&mut self) {
        while let Some(c) = self.current_char() {
            if !c.is_whitespace() {
                break;
            }
            self.advance_by_char(c, c.len_utf8());
        }
    }

    /// Expect `s` to be the start of the remaining input, consume it or return Err.
    /// Assumes `s` does not contain newlines.
    fn expect(&mut self, s: &str) -> ParseResult<()> {
        if self.consume(s) {
            Ok(())
        } else if self.eof() {
            Err(self.make_error(ParseErrorKind::unexpected_eof(Some(s.to_string()))))
        } else {
            Err(self.make_error(ParseErrorKind::UnexpectedToken {
                expected: s.to_string(),
                found: self
                    .rest()
                    .chars()
                    .take(s.chars().count().saturating_add(10))
                    .collect(),
            }))
        }
    }

    /// Consume and return a bare identifier.
    fn consume_identifier(&mut self) -> ParseResult<&'a str> {
        let start = self.pos;
        while let Some(c) = self.current_char() {
            if !is_id_char(c) {
                break;
            }
            self.advance_by_char(c, c.len_utf8());
        }
        if start == self.pos {
            Err(self.invalid_identifier())
        } else {
            Ok(self.slice(start, self.pos))
        }
    }

    fn invalid_identifier(&self) -> ParseError {
        match self.current_char() {
            Some(c) => self.make_error(ParseErrorKind::InvalidIdentifier {
                at_char: c.to_string(),
            }),
            None => self.make_error(ParseErrorKind::unexpected_eof(Some("identifier".to_string()))),
        }
    }

    // --- Statements ---

    /// Parses statements until EOF or a block terminator.
    fn parse_statements(&mut self) -> ParseResult<(Vec<Statement>, Terminator)> {
        let mut body = Vec::new();
        loop {
            if self.eof() {
                return Ok((body, Terminator::Eof));
            }
            if self.peek("{{") {
                if let Some(terminator) = self.parse_terminator()? {
                    return Ok((body, terminator));
                }
                body.push(self.parse_tag()?);
            } else {
                body.push(self.parse_content());
            }
        }
    }

    /// Parses a block of constant text up to the next unescaped `{{`.
    fn parse_content(&mut self) -> Statement {
        let mut original = String::new();
        while let Some(c) = self.current_char() {
            // \{{ is a literal {{
            if self.peek("\\{{") {
                self.advance_bytes_no_newline(3);
                original.push_str("{{");
                continue;
            }
            if self.peek("{{") {
                break;
            }
            original.push(c);
            self.advance_by_char(c, c.len_utf8());
        }
        Statement::Content(ContentStatement { original })
    }

    fn parse_terminator(&mut self) -> ParseResult<Option<Terminator>> {
        if self.peek_n(["{{", "/"]) {
            let (line, column) = (self.line, self.current_column());
            self.expect("{{")?;
            self.consume_whitespace();
            self.expect("/")?;
            self.consume_whitespace();
            let name = self.parse_path()?.original;
            self.consume_whitespace();
            self.expect("}}")?;
            return Ok(Some(Terminator::Close { name, line, column }));
        }

        if self.peek_n(["{{", "^", "}}"]) {
            self.expect("{{")?;
            self.consume_whitespace();
            self.expect("^")?;
            self.consume_whitespace();
            self.expect("}}")?;
            return Ok(Some(Terminator::Else));
        }

        if self.peek_keyword("else") {
            self.expect("{{")?;
            self.consume_whitespace();
            self.expect("else")?;
            self.consume_whitespace();
            if self.consume("}}") {
                return Ok(Some(Terminator::Else));
            }
            let (expression, block_params) = self.parse_expression("}}", true)?;
            self.expect("}}")?;
            return Ok(Some(Terminator::ElseChain {
                expression,
                block_params,
            }));
        }

        Ok(None)
    }

    fn parse_tag(&mut self) -> ParseResult<Statement> {
        if self.consume("{{!--") {
            let value = self.take_until("--}}")?;
            return Ok(Statement::Comment(CommentStatement { value }));
        }
        if self.consume("{{!") {
            let value = self.take_until("}}")?;
            return Ok(Statement::Comment(CommentStatement { value }));
        }
        if self.consume("{{{") {
            let (expression, _) = self.parse_expression("}}}", false)?;
            self.expect("}}}")?;
            return Ok(Statement::Mustache(MustacheStatement {
                expression,
                unescaped: true,
            }));
        }
        if self.consume("{{#") {
            return self.parse_block(false).map(Statement::Block);
        }
        if self.consume("{{^") {
            return self.parse_block(true).map(Statement::Block);
        }
        if self.consume("{{>") {
            return self.parse_partial().map(Statement::Partial);
        }

        self.expect("{{")?;
        self.consume_whitespace();
        let ampersand = self.consume("&");
        let (expression, _) = self.parse_expression("}}", false)?;
        self.expect("}}")?;
        Ok(Statement::Mustache(MustacheStatement {
            expression,
            unescaped: ampersand || self.unescaped,
        }))
    }

    /// Returns the text up to `end` and consumes both.
    fn take_until(&mut self, end: &str) -> ParseResult<String> {
        match self.rest().find(end) {
            Some(len) => {
                let value = self.rest().get(..len).unwrap_or_default().to_string();
                self.advance_over(len);
                self.advance_bytes_no_newline(end.len());
                Ok(value)
            }
            None => {
                self.advance_over(self.rest().len());
                Err(self.make_error(ParseErrorKind::unexpected_eof(Some(end.to_string()))))
            }
        }
    }

    fn parse_block(&mut self, inverted: bool) -> ParseResult<BlockStatement> {
        let (expression, block_params) = self.parse_expression("}}", true)?;
        self.expect("}}")?;

        let open = match &expression.path {
            Param::Path(path) => path.original.clone(),
            other => other.literal_str().unwrap_or_default().to_string(),
        };

        let block = self.parse_block_rest(expression, block_params, &open)?;
        if inverted {
            Ok(BlockStatement {
                expression: block.expression,
                program: block.inverse,
                inverse: block.program,
            })
        } else {
            Ok(block)
        }
    }

    /// Parses a block body, its optional inverse and the closing tag for `open`.
    ///
    /// A chained `{{else helper}}` becomes a nested block that is the sole
    /// statement of the inverse, and shares the outer closing tag.
    fn parse_block_rest(
        &mut self,
        expression: Expression,
        block_params: Vec<String>,
        open: &str,
    ) -> ParseResult<BlockStatement> {
        let (body, terminator) = self.parse_statements()?;
        let program = Program { block_params, body };

        let inverse = match terminator {
            Terminator::Eof => return Err(self.unclosed(open)),
            Terminator::Close { name, line, column } => {
                Self::check_close(open, name, line, column)?;
                None
            }
            Terminator::Else => {
                let (body, terminator) = self.parse_statements()?;
                match terminator {
                    Terminator::Close { name, line, column } => {
                        Self::check_close(open, name, line, column)?
                    }
                    Terminator::Eof => return Err(self.unclosed(open)),
                    Terminator::Else | Terminator::ElseChain { .. } => {
                        return Err(self.make_error(ParseErrorKind::Expected {
                            description: format!("{{{{/{open}}}}} after {{{{else}}}}"),
                        }));
                    }
                }
                Some(Program {
                    block_params: Vec::new(),
                    body,
                })
            }
            Terminator::ElseChain {
                expression: chained,
                block_params,
            } => {
                let nested = self.parse_block_rest(chained, block_params, open)?;
                Some(Program {
                    block_params: Vec::new(),
                    body: vec![Statement::Block(nested)],
                })
            }
        };

        Ok(BlockStatement {
            expression,
            program: Some(program),
            inverse,
        })
    }

    fn unclosed(&self, open: &str) -> ParseError {
        self.make_error(ParseErrorKind::unexpected_eof(Some(format!("{{{{/{open}}}}}"))))
    }

    fn check_close(open: &str, close: String, line: usize, column: usize) -> ParseResult<()> {
        if open == close {
            Ok(())
        } else {
            Err(ParseError {
                line,
                column,
                kind: ParseErrorKind::MismatchedBlock {
                    open: open.to_string(),
                    close,
                },
            })
        }
    }

    fn parse_partial(&mut self) -> ParseResult<PartialStatement> {
        self.consume_whitespace();
        let name = self.parse_param()?;
        let mut context = None;
        let mut hash = None;

        loop {
            self.consume_whitespace();
            if self.eof() {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some("}}".to_string()))));
            }
            if self.peek("}}") {
                break;
            }
            if hash.is_none() && self.peek_hash_key() {
                hash = Some(self.parse_hash()?);
                continue;
            }
            if hash.is_some() || context.is_some() {
                return Err(self.make_error(ParseErrorKind::Message(
                    "Unsupported number of partial arguments".to_string(),
                )));
            }
            context = Some(self.parse_param()?);
        }
        self.expect("}}")?;

        Ok(PartialStatement {
            name,
            context,
            hash,
        })
    }

    // --- Expressions ---

    /// Parses `callee param* hash? (as |a b|)?` up to, not including, `close`.
    fn parse_expression(
        &mut self,
        close: &str,
        allow_block_params: bool,
    ) -> ParseResult<(Expression, Vec<String>)> {
        self.consume_whitespace();
        let path = self.parse_param()?;
        let mut params = Vec::new();
        let mut hash = None;
        let mut block_params = Vec::new();

        loop {
            self.consume_whitespace();
            if self.eof() {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(close.to_string()))));
            }
            if self.peek(close) {
                break;
            }
            if allow_block_params && self.peek_block_params() {
                block_params = self.parse_block_params()?;
                self.consume_whitespace();
                if !self.peek(close) {
                    return Err(self.make_error(ParseErrorKind::Expected {
                        description: format!("'{close}' after block parameters"),
                    }));
                }
                break;
            }
            if hash.is_none() && self.peek_hash_key() {
                hash = Some(self.parse_hash()?);
                continue;
            }
            if hash.is_some() {
                return Err(self.make_error(ParseErrorKind::Expected {
                    description: format!("'{close}' after hash arguments"),
                }));
            }
            params.push(self.parse_param()?);
        }

        Ok((Expression { path, params, hash }, block_params))
    }

    fn peek_hash_key(&self) -> bool {
        let rest = self.rest();
        let len = rest.find(|c| !is_id_char(c)).unwrap_or(rest.len());
        len > 0
            && rest
                .get(len..)
                .is_some_and(|after| after.trim_start().starts_with('='))
    }

    fn parse_hash(&mut self) -> ParseResult<Hash> {
        let mut pairs = Vec::new();
        loop {
            self.consume_whitespace();
            if !self.peek_hash_key() {
                break;
            }
            let key = self.consume_identifier()?.to_string();
            self.consume_whitespace();
            self.expect("=")?;
            self.consume_whitespace();
            let value = self.parse_param()?;
            pairs.push(HashPair { key, value });
        }
        Ok(Hash { pairs })
    }

    fn peek_block_params(&self) -> bool {
        self.rest()
            .strip_prefix("as")
            .is_some_and(|after| after.starts_with(char::is_whitespace) && after.trim_start().starts_with('|'))
    }

    fn parse_block_params(&mut self) -> ParseResult<Vec<String>> {
        self.expect("as")?;
        self.consume_whitespace();
        self.expect("|")?;
        let mut names = Vec::new();
        loop {
            self.consume_whitespace();
            if self.consume("|") {
                break;
            }
            names.push(self.consume_identifier()?.to_string());
        }
        Ok(names)
    }

    fn parse_param(&mut self) -> ParseResult<Param> {
        self.consume_whitespace();
        match self.current_char() {
            None => Err(self.make_error(ParseErrorKind::unexpected_eof(Some("expression".to_string())))),
            Some('(') => {
                self.advance_bytes_no_newline(1);
                let (expression, _) = self.parse_expression(")", false)?;
                self.expect(")")?;
                Ok(Param::SubExpression(SubExpression {
                    expression: Box::new(expression),
                }))
            }
            Some(quote @ ('"' | '\'')) => self.parse_string(quote).map(Param::String),
            Some(_) => {
                if let Some(number) = self.try_parse_number() {
                    return Ok(Param::Number(number));
                }
                for (keyword, value) in [("true", true), ("false", false)] {
                    if self.peek_literal(keyword) {
                        self.advance_bytes_no_newline(keyword.len());
                        return Ok(Param::Boolean(BooleanLiteral {
                            value,
                            original: keyword.to_string(),
                        }));
                    }
                }
                self.parse_path().map(Param::Path)
            }
        }
    }

    /// Whether `word` is next and is followed by a delimiter.
    fn peek_literal(&self, word: &str) -> bool {
        self.rest()
            .strip_prefix(word)
            .is_some_and(|after| after.chars().next().is_none_or(|c| is_delimiter(c) && c != '.' && c != '/'))
    }

    fn parse_string(&mut self, quote: char) -> ParseResult<StringLiteral> {
        let start = self.pos;
        self.advance_bytes_no_newline(1);
        let mut value = String::new();
        loop {
            let Some(c) = self.current_char() else {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(quote.to_string()))));
            };
            if c == '\\' && self.next_char() == Some(quote) {
                value.push(quote);
                self.advance_bytes_no_newline(2);
                continue;
            }
            self.advance_by_char(c, c.len_utf8());
            if c == quote {
                break;
            }
            value.push(c);
        }
        Ok(StringLiteral {
            value,
            original: self.slice(start, self.pos).to_string(),
        })
    }

    fn try_parse_number(&mut self) -> Option<NumberLiteral> {
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let mut len = usize::from(bytes.first() == Some(&b'-'));
        let digits_start = len;
        while bytes.get(len).is_some_and(u8::is_ascii_digit) {
            len = len.saturating_add(1);
        }
        if len == digits_start {
            return None;
        }
        let mut is_int = true;
        if bytes.get(len) == Some(&b'.')
            && bytes.get(len.saturating_add(1)).is_some_and(u8::is_ascii_digit)
        {
            is_int = false;
            len = len.saturating_add(1);
            while bytes.get(len).is_some_and(u8::is_ascii_digit) {
                len = len.saturating_add(1);
            }
        }
        let (original, after) = rest.split_at_checked(len)?;
        let followed_by_delimiter = after
            .chars()
            .next()
            .is_none_or(|c| is_delimiter(c) && c != '.' && c != '/');
        if !followed_by_delimiter {
            return None;
        }

        let value = original.parse::<f64>().ok()?;
        self.advance_bytes_no_newline(len);
        Some(NumberLiteral {
            value,
            is_int,
            original: original.to_string(),
        })
    }

    /// Parses a dotted or slashed path such as `../user.[first name]`.
    fn parse_path(&mut self) -> ParseResult<PathExpression> {
        let start = self.pos;
        let (line, column) = (self.line, self.current_column());
        let data = self.consume("@");
        let mut segments: Vec<(&'a str, bool)> = Vec::new();

        loop {
            let segment_start = self.pos;
            if self.peek("[") {
                match self.rest().find(']') {
                    Some(end) => self.advance_over(end.saturating_add(1)),
                    None => {
                        return Err(self.make_error(ParseErrorKind::unexpected_eof(Some("]".to_string()))));
                    }
                }
                segments.push((self.slice(segment_start, self.pos), true));
            } else if self.peek("..") {
                self.advance_bytes_no_newline(2);
                segments.push(("..", false));
            } else if self.peek(".") && self.next_char().is_none_or(is_delimiter) {
                self.advance_bytes_no_newline(1);
                segments.push((".", false));
            } else {
                segments.push((self.consume_identifier()?, false));
            }

            if self.peek(".") || self.peek("/") {
                let after = self.next_char();
                if after.is_some_and(|c| is_id_char(c) || c == '[' || c == '.') {
                    self.advance_bytes_no_newline(1);
                    continue;
                }
                self.advance_bytes_no_newline(1);
                return Err(self.make_error(ParseErrorKind::Expected {
                    description: "path segment after separator".to_string(),
                }));
            }
            break;
        }

        let original = self.slice(start, self.pos).to_string();
        let mut parts = Vec::new();
        let mut depth: usize = 0;
        let mut scoped = false;
        for (segment, bracketed) in segments {
            if !bracketed && matches!(segment, ".." | "." | "this") {
                if !parts.is_empty() {
                    return Err(ParseError {
                        line,
                        column,
                        kind: ParseErrorKind::Message(format!("Invalid path: {original}")),
                    });
                }
                if segment == ".." {
                    depth = depth.saturating_add(1);
                } else {
                    scoped = true;
                }
            } else {
                parts.push(segment.to_string());
            }
        }

        Ok(PathExpression {
            original,
            parts,
            depth,
            data,
            scoped,
        })
    }
}

/// Parses template source into a [`Program`].
///
/// With `unescaped` set every `{{mustache}}` is emitted as if it had been
/// written with triple braces.
pub fn parse(input: &str, unescaped: bool) -> Result<Program, ParseError> {
    let mut parser = Parser::new(input, unescaped);
    let (body, terminator) = parser.parse_statements()?;

    match terminator {
        Terminator::Eof => Ok(Program {
            block_params: Vec::new(),
            body,
        }),
        Terminator::Close { name, line, column } => Err(ParseError {
            line,
            column,
            kind: ParseErrorKind::Message(format!("Unexpected closing tag {{{{/{name}}}}}")),
        }),
        Terminator::Else | Terminator::ElseChain { .. } => Err(parser.make_error(
            ParseErrorKind::Message("Unexpected {{else}} outside of a block".to_string()),
        )),
    }
}

/// Tests for individual functions in the parser module.
#[cfg(test)]
mod test_utils {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_peek_n() {
        let parser = Parser::new("  {{  / foo}}", false);
        assert!(!parser.peek_n(["{{", "/"]));

        let parser = Parser::new("{{  / foo}}", false);
        assert!(parser.peek_n(["{{", "/"]));
        assert!(!parser.peek_n(["{{", "^"]));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_peek_keyword() {
        assert!(Parser::new("{{else}}", false).peek_keyword("else"));
        assert!(Parser::new("{{ else if a}}", false).peek_keyword("else"));
        assert!(!Parser::new("{{elsewhere}}", false).peek_keyword("else"));
    }
}
