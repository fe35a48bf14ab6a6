//! Statement scanner for candidate topology code.
//!
//! Line-oriented: each logical line (parenthetical continuations joined)
//! becomes one classified statement. The scanner is purely syntactic; it
//! does not know the grammar vocabulary, so `Construction` and `Call` cover
//! any assignment-to-constructor and any method call. The validator decides
//! which of those the grammar actually recognizes.
//!
//! Anything Python-shaped that carries no topology meaning is tolerated as
//! `Auxiliary`. Text that is not statement-shaped at all is a parse error
//! with its line number.

use thiserror::Error;

/// Positioned scan failure.
#[derive(Debug, Clone, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

/// One argument of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Quoted string literal, quotes stripped.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Bare identifier.
    Ident(String),
    /// Anything else the scanner tolerates.
    Other(String),
}

/// What a logical line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `import x` or `from x import Y`; `module` is the dotted source.
    Import { module: String },
    /// `name = Class(args)`.
    Construction {
        device: String,
        class: String,
        args: Vec<Arg>,
    },
    /// `name.method(args)`.
    Call {
        device: String,
        method: String,
        args: Vec<Arg>,
    },
    /// Parsed fine, means nothing to validation.
    Auxiliary,
}

/// A classified statement with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// 1-based line number of the statement's first physical line.
    pub line: usize,
    pub kind: StmtKind,
}

/// Scan a whole candidate. The first malformed line aborts the scan.
pub fn parse_source(source: &str) -> Result<Vec<Stmt>, ParseError> {
    let mut statements = Vec::new();
    for (line, text) in logical_lines(source)? {
        let kind = classify(&text).map_err(|message| ParseError { line, message })?;
        statements.push(Stmt { line, kind });
    }
    Ok(statements)
}

/// Strip a trailing comment and report the bracket-depth delta of what
/// remains. `#` inside a string literal is content, not a comment.
fn strip_comment(line: &str) -> Result<(String, i32), String> {
    let mut out = String::new();
    let mut quote: Option<char> = None;
    let mut delta = 0i32;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == '\\' {
                    if let Some(&escaped) = chars.peek() {
                        out.push(escaped);
                        chars.next();
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                '#' => break,
                '(' | '[' | '{' => {
                    delta += 1;
                    out.push(c);
                }
                ')' | ']' | '}' => {
                    delta -= 1;
                    out.push(c);
                }
                _ => out.push(c),
            },
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal".to_string());
    }
    Ok((out, delta))
}

/// Join physical lines into logical statements: an open bracket carries the
/// statement over to the next line, the way the host language continues
/// inside parentheses.
fn logical_lines(source: &str) -> Result<Vec<(usize, String)>, ParseError> {
    let mut out = Vec::new();
    let mut buffer = String::new();
    let mut start_line = 0usize;
    let mut depth = 0i32;

    for (idx, raw) in source.lines().enumerate() {
        let number = idx + 1;
        let (cleaned, delta) =
            strip_comment(raw).map_err(|message| ParseError { line: number, message })?;

        if buffer.is_empty() {
            if cleaned.trim().is_empty() {
                continue;
            }
            start_line = number;
            buffer.push_str(cleaned.trim());
        } else {
            buffer.push(' ');
            buffer.push_str(cleaned.trim());
        }

        depth += delta;
        if depth < 0 {
            return Err(ParseError {
                line: number,
                message: "unmatched closing bracket".to_string(),
            });
        }
        if depth == 0 {
            out.push((start_line, std::mem::take(&mut buffer)));
        }
    }

    if depth > 0 || !buffer.trim().is_empty() {
        return Err(ParseError {
            line: start_line,
            message: "unclosed bracket at end of input".to_string(),
        });
    }
    Ok(out)
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn classify_arg(s: &str) -> Arg {
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        let quoted = (bytes[0] == b'\'' && bytes[s.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[s.len() - 1] == b'"');
        if quoted {
            return Arg::Str(s[1..s.len() - 1].to_string());
        }
    }
    if let Ok(n) = s.parse::<i64>() {
        return Arg::Int(n);
    }
    if is_ident(s) {
        return Arg::Ident(s.to_string());
    }
    Arg::Other(s.to_string())
}

/// Parse a comma-separated argument list starting just after `(`. Returns
/// the arguments and the text remaining after the matching `)`.
fn parse_call_args(s: &str) -> Result<(Vec<Arg>, &str), String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut chars = s.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == '\\' {
                    if let Some(&(_, escaped)) = chars.peek() {
                        current.push(escaped);
                        chars.next();
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    current.push(c);
                }
                ')' if depth == 0 => {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        args.push(classify_arg(trimmed));
                    }
                    return Ok((args, &s[i + 1..]));
                }
                ')' | ']' | '}' => {
                    depth -= 1;
                    current.push(c);
                }
                ',' if depth == 0 => {
                    let trimmed = current.trim();
                    if trimmed.is_empty() {
                        return Err("empty argument".to_string());
                    }
                    args.push(classify_arg(trimmed));
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    Err("unclosed '('".to_string())
}

/// Find a top-level assignment `=`, skipping comparison and augmented
/// operators, quotes, and bracketed subexpressions.
fn top_level_assign(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == b'\\' {
                    i += 2;
                    continue;
                }
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                b'\'' | b'"' => quote = Some(c),
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth -= 1,
                b'=' if depth == 0 => {
                    let prev = if i > 0 { bytes[i - 1] } else { 0 };
                    let next = if i + 1 < bytes.len() { bytes[i + 1] } else { 0 };
                    if next == b'=' {
                        i += 2;
                        continue;
                    }
                    if !matches!(prev, b'=' | b'<' | b'>' | b'!' | b'+' | b'-' | b'*' | b'/' | b'%')
                    {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

fn classify(text: &str) -> Result<StmtKind, String> {
    let text = text.trim();

    if let Some(rest) = text.strip_prefix("from ") {
        let mut parts = rest.split_whitespace();
        let module = parts
            .next()
            .ok_or_else(|| "incomplete import".to_string())?
            .to_string();
        if parts.next() != Some("import") || parts.next().is_none() {
            return Err("malformed import".to_string());
        }
        return Ok(StmtKind::Import { module });
    }
    if let Some(rest) = text.strip_prefix("import ") {
        let module = rest
            .split_whitespace()
            .next()
            .ok_or_else(|| "incomplete import".to_string())?
            .to_string();
        return Ok(StmtKind::Import { module });
    }

    if let Some(eq) = top_level_assign(text) {
        let lhs = text[..eq].trim();
        let rhs = text[eq + 1..].trim();
        if !is_ident(lhs) {
            return Ok(StmtKind::Auxiliary);
        }
        if let Some(paren) = rhs.find('(') {
            let callee = rhs[..paren].trim();
            if is_ident(callee) {
                let (args, rest) = parse_call_args(&rhs[paren + 1..])?;
                if !rest.trim().is_empty() {
                    return Err(format!("unexpected text after call: '{}'", rest.trim()));
                }
                return Ok(StmtKind::Construction {
                    device: lhs.to_string(),
                    class: callee.to_string(),
                    args,
                });
            }
        }
        return Ok(StmtKind::Auxiliary);
    }

    if let Some(paren) = text.find('(') {
        let head = text[..paren].trim();
        if let Some(dot) = head.rfind('.') {
            let receiver = head[..dot].trim();
            let method = head[dot + 1..].trim();
            let (args, rest) = parse_call_args(&text[paren + 1..])?;
            if !rest.trim().is_empty() {
                return Err(format!("unexpected text after call: '{}'", rest.trim()));
            }
            if is_ident(receiver) && is_ident(method) {
                return Ok(StmtKind::Call {
                    device: receiver.to_string(),
                    method: method.to_string(),
                    args,
                });
            }
            // Chained attribute access; parseable, not a device op.
            if head.split('.').all(|part| is_ident(part.trim())) {
                return Ok(StmtKind::Auxiliary);
            }
            return Err("unrecognized statement".to_string());
        }
        if is_ident(head) {
            let (_, rest) = parse_call_args(&text[paren + 1..])?;
            if !rest.trim().is_empty() {
                return Err(format!("unexpected text after call: '{}'", rest.trim()));
            }
            return Ok(StmtKind::Auxiliary);
        }
        return Err("unrecognized statement".to_string());
    }

    Err("unrecognized statement".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<StmtKind> {
        parse_source(source)
            .unwrap()
            .into_iter()
            .map(|s| s.kind)
            .collect()
    }

    #[test]
    fn test_construction_statement() {
        let stmts = kinds("h1 = Host('h1')");
        assert_eq!(
            stmts,
            vec![StmtKind::Construction {
                device: "h1".to_string(),
                class: "Host".to_string(),
                args: vec![Arg::Str("h1".to_string())],
            }]
        );
    }

    #[test]
    fn test_call_statement_with_mixed_args() {
        let stmts = kinds("h1.setIp('10.0.0.1', 24, \"h1s1\")");
        assert_eq!(
            stmts,
            vec![StmtKind::Call {
                device: "h1".to_string(),
                method: "setIp".to_string(),
                args: vec![
                    Arg::Str("10.0.0.1".to_string()),
                    Arg::Int(24),
                    Arg::Str("h1s1".to_string()),
                ],
            }]
        );
    }

    #[test]
    fn test_link_peer_is_ident() {
        let stmts = kinds("h1.connect(s1, \"h1s1\", \"s1h1\")");
        match &stmts[0] {
            StmtKind::Call { args, .. } => {
                assert_eq!(args[0], Arg::Ident("s1".to_string()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_imports() {
        let stmts = kinds("from profissa_lft.host import Host\nimport os");
        assert_eq!(
            stmts,
            vec![
                StmtKind::Import {
                    module: "profissa_lft.host".to_string()
                },
                StmtKind::Import {
                    module: "os".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let source = "# build the hosts\n\nh1 = Host('h1')  # first host\n";
        let stmts = parse_source(source).unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].line, 3);
    }

    #[test]
    fn test_hash_inside_string_is_content() {
        let stmts = kinds("h1.connect(s1, \"h1#s1\", \"s1#h1\")");
        match &stmts[0] {
            StmtKind::Call { args, .. } => {
                assert_eq!(args[1], Arg::Str("h1#s1".to_string()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_multiline_call_joined() {
        let source = "h1.connect(\n    s1,\n    \"h1s1\",\n    \"s1h1\"\n)";
        let stmts = parse_source(source).unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].line, 1);
        assert!(matches!(stmts[0].kind, StmtKind::Call { .. }));
    }

    #[test]
    fn test_unterminated_string_errors_with_line() {
        let err = parse_source("h1 = Host('h1')\nh2 = Host('h2").err().unwrap();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_unclosed_paren_errors() {
        let err = parse_source("h1 = Host('h1'").err().unwrap();
        assert!(err.message.contains("unclosed"));
    }

    #[test]
    fn test_unmatched_close_errors() {
        let err = parse_source("h1 = Host('h1'))").err().unwrap();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_prose_is_a_parse_error() {
        let err = parse_source("Sure, here is your topology code").err().unwrap();
        assert!(err.message.contains("unrecognized"));
    }

    #[test]
    fn test_auxiliary_statements_tolerated() {
        let stmts = kinds("x = 5\nprint(h1)\nnet.hosts.append(h1)");
        assert_eq!(
            stmts,
            vec![StmtKind::Auxiliary, StmtKind::Auxiliary, StmtKind::Auxiliary]
        );
    }

    #[test]
    fn test_comparison_is_not_assignment() {
        // `==` must not split the line into an assignment.
        let stmts = kinds("check(h1 == h2)");
        assert_eq!(stmts, vec![StmtKind::Auxiliary]);
    }

    #[test]
    fn test_trailing_comma_accepted() {
        let stmts = kinds("h1.instantiate(  )\nh1.connect(s1, \"a\", \"b\",)");
        assert_eq!(stmts.len(), 2);
        match &stmts[1] {
            StmtKind::Call { args, .. } => assert_eq!(args.len(), 3),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
