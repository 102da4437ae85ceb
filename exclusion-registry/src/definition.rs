//! Line-oriented exclusion definitions.
//!
//! Each non-blank, non-comment line declares one exclusion:
//!
//! ```text
//! exclude :test_exit, "exits the whole process"
//! exclude :'test_pseudo_encoding_inspect(UTF-16)', "needs investigation"
//! exclude("test_plain_string", 'single quoted reason')
//! ```
//!
//! The test identifier is a bare symbol, a quoted symbol or a string
//! literal; the reason is a string literal. Nothing is evaluated, so
//! `#{...}` inside a double-quoted literal is kept verbatim.

use crate::error::{LoadError, Result};
use serde::{Deserialize, Serialize};
use std::iter::Peekable;
use std::str::CharIndices;

const KEYWORD: &str = "exclude";

/// One `(test_id, reason)` pair as declared in a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
  pub test_id: String,
  pub reason: String,
  /// 1-based line in the unit, when the format has lines.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub line: Option<usize>,
}

impl Record {
  pub fn new(test_id: impl Into<String>, reason: impl Into<String>) -> Self {
    Self {
      test_id: test_id.into(),
      reason: reason.into(),
      line: None,
    }
  }

  pub fn at_line(mut self, line: usize) -> Self {
    self.line = Some(line);
    self
  }
}

/// Parses a whole unit. `unit` only labels errors.
pub fn parse_unit(unit: &str, source: &str) -> Result<Vec<Record>> {
  let source = source.strip_prefix('\u{feff}').unwrap_or(source);
  let mut records = Vec::new();
  for (idx, line) in source.lines().enumerate() {
    let line_no = idx + 1;
    if let Some(record) =
      parse_line(line).map_err(|message| LoadError::malformed(unit, Some(line_no), message))?
    {
      records.push(record.at_line(line_no));
    }
  }
  Ok(records)
}

/// Parses a single line; `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> std::result::Result<Option<Record>, String> {
  let mut cursor = Cursor::new(line);
  cursor.skip_ws();
  match cursor.peek() {
    None | Some('#') => return Ok(None),
    _ => {}
  }

  let word = cursor.take_while(is_ident_char);
  if word != KEYWORD {
    return Err(if word.is_empty() {
      format!("expected `{KEYWORD}`, found {}", cursor.describe_next())
    } else {
      format!("unknown directive `{word}`, expected `{KEYWORD}`")
    });
  }

  let had_ws = cursor.skip_ws();
  let parenthesized = cursor.eat('(');
  if !parenthesized && !had_ws {
    return Err(format!(
      "expected whitespace or `(` after `{KEYWORD}`, found {}",
      cursor.describe_next()
    ));
  }
  cursor.skip_ws();

  let test_id = parse_test_id(&mut cursor)?;
  cursor.skip_ws();
  match cursor.peek() {
    Some(',') => {
      cursor.bump();
    }
    None | Some('#') | Some(')') => return Err(format!("missing reason for `{test_id}`")),
    Some(_) => {
      return Err(format!(
        "expected `,` after test identifier, found {}",
        cursor.describe_next()
      ))
    }
  }
  cursor.skip_ws();

  let reason = match cursor.peek() {
    Some(quote @ ('"' | '\'')) => {
      cursor.bump();
      parse_literal(&mut cursor, quote)?
    }
    None | Some('#') | Some(')') => return Err(format!("missing reason for `{test_id}`")),
    Some(_) => {
      return Err(format!(
        "expected reason string literal, found {}",
        cursor.describe_next()
      ))
    }
  };

  cursor.skip_ws();
  if parenthesized && !cursor.eat(')') {
    return Err(format!(
      "expected `)` to close `{KEYWORD}(`, found {}",
      cursor.describe_next()
    ));
  }
  cursor.skip_ws();
  match cursor.peek() {
    None | Some('#') => Ok(Some(Record::new(test_id, reason))),
    Some(_) => Err(format!(
      "unexpected trailing input {}",
      cursor.describe_next()
    )),
  }
}

fn parse_test_id(cursor: &mut Cursor<'_>) -> std::result::Result<String, String> {
  match cursor.peek() {
    Some(':') => {
      cursor.bump();
      match cursor.peek() {
        Some(quote @ ('"' | '\'')) => {
          cursor.bump();
          parse_literal(cursor, quote)
        }
        _ => {
          let symbol = cursor.take_bare_symbol();
          if symbol.is_empty() {
            Err(format!(
              "expected symbol name after `:`, found {}",
              cursor.describe_next()
            ))
          } else {
            Ok(symbol.to_string())
          }
        }
      }
    }
    Some(quote @ ('"' | '\'')) => {
      cursor.bump();
      parse_literal(cursor, quote)
    }
    _ => Err(format!(
      "expected test identifier, found {}",
      cursor.describe_next()
    )),
  }
}

/// Reads a literal body up to the closing `quote`, which must already have
/// been consumed at the opening side.
fn parse_literal(cursor: &mut Cursor<'_>, quote: char) -> std::result::Result<String, String> {
  let mut out = String::new();
  loop {
    let Some(c) = cursor.bump() else {
      return Err(format!("unterminated string literal (missing closing {quote})"));
    };
    if c == quote {
      return Ok(out);
    }
    if c != '\\' {
      out.push(c);
      continue;
    }
    let Some(escaped) = cursor.bump() else {
      return Err(format!("unterminated string literal (missing closing {quote})"));
    };
    if quote == '\'' {
      // Single quotes only recognise `\\` and `\'`.
      if escaped != '\\' && escaped != '\'' {
        out.push('\\');
      }
      out.push(escaped);
      continue;
    }
    out.push(match escaped {
      'n' => '\n',
      't' => '\t',
      'r' => '\r',
      '0' => '\0',
      'e' => '\u{1b}',
      other => other,
    });
  }
}

fn is_ident_char(c: char) -> bool {
  c == '_' || c.is_alphanumeric()
}

/// Whether `id` can be written as `:id` without quoting.
pub fn is_bare_symbol(id: &str) -> bool {
  let body = id
    .strip_suffix(|c: char| matches!(c, '?' | '!' | '='))
    .unwrap_or(id);
  let mut chars = body.chars();
  match chars.next() {
    Some(c) if c == '_' || c.is_alphabetic() => {}
    _ => return false,
  }
  chars.all(is_ident_char)
}

/// Renders one record as a line (without the trailing newline).
pub fn render_record(record: &Record) -> String {
  let id = if is_bare_symbol(&record.test_id) {
    format!(":{}", record.test_id)
  } else if record.test_id.chars().any(char::is_control) {
    format!(":{}", double_quoted(&record.test_id))
  } else {
    format!(":'{}'", record.test_id.replace('\\', "\\\\").replace('\'', "\\'"))
  };
  format!("{KEYWORD} {id}, {}", double_quoted(&record.reason))
}

/// Renders records in order, one per line.
pub fn render_unit<'a>(records: impl IntoIterator<Item = &'a Record>) -> String {
  let mut out = String::new();
  for record in records {
    out.push_str(&render_record(record));
    out.push('\n');
  }
  out
}

fn double_quoted(value: &str) -> String {
  let mut out = String::with_capacity(value.len() + 2);
  out.push('"');
  for c in value.chars() {
    match c {
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\t' => out.push_str("\\t"),
      '\r' => out.push_str("\\r"),
      '\0' => out.push_str("\\0"),
      '\u{1b}' => out.push_str("\\e"),
      '#' => out.push_str("\\#"),
      other => out.push(other),
    }
  }
  out.push('"');
  out
}

struct Cursor<'a> {
  src: &'a str,
  chars: Peekable<CharIndices<'a>>,
}

impl<'a> Cursor<'a> {
  fn new(src: &'a str) -> Self {
    Self {
      src,
      chars: src.char_indices().peekable(),
    }
  }

  fn peek(&mut self) -> Option<char> {
    self.chars.peek().map(|&(_, c)| c)
  }

  fn bump(&mut self) -> Option<char> {
    self.chars.next().map(|(_, c)| c)
  }

  fn eat(&mut self, expected: char) -> bool {
    if self.peek() == Some(expected) {
      self.bump();
      true
    } else {
      false
    }
  }

  fn offset(&mut self) -> usize {
    self.chars.peek().map(|&(i, _)| i).unwrap_or(self.src.len())
  }

  /// Returns whether any whitespace was skipped.
  fn skip_ws(&mut self) -> bool {
    let start = self.offset();
    while matches!(self.peek(), Some(c) if c.is_whitespace()) {
      self.bump();
    }
    self.offset() != start
  }

  fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
    let start = self.offset();
    while matches!(self.peek(), Some(c) if pred(c)) {
      self.bump();
    }
    let end = self.offset();
    &self.src[start..end]
  }

  fn take_bare_symbol(&mut self) -> &'a str {
    let start = self.offset();
    match self.peek() {
      Some(c) if c == '_' || c.is_alphabetic() => {}
      _ => return "",
    }
    self.take_while(is_ident_char);
    if matches!(self.peek(), Some('?' | '!' | '=')) {
      self.bump();
    }
    let end = self.offset();
    &self.src[start..end]
  }

  fn describe_next(&mut self) -> String {
    let offset = self.offset();
    let rest = &self.src[offset..];
    if rest.is_empty() {
      "end of line".to_string()
    } else {
      let snippet: String = rest.chars().take(16).collect();
      format!("`{snippet}`")
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const THREAD_SAMPLE: &str = r#"exclude :test_exit, "exits the whole process"
exclude :test_handle_interrupt, "hangs"
exclude :test_handle_interrupted?, "needs investigation"

# comments are ignored
exclude :test_thread_variable?, "needs investigation"
"#;

  fn malformed_line(source: &str) -> (Option<usize>, String) {
    match parse_unit("TestX.rb", source).unwrap_err() {
      LoadError::Malformed { location, message } => (location.line, message),
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn parses_bare_symbols_with_predicate_suffix() {
    let records = parse_unit("TestThread.rb", THREAD_SAMPLE).unwrap();
    let ids: Vec<_> = records.iter().map(|r| r.test_id.as_str()).collect();
    assert_eq!(
      ids,
      vec![
        "test_exit",
        "test_handle_interrupt",
        "test_handle_interrupted?",
        "test_thread_variable?"
      ]
    );
    assert_eq!(records[0].reason, "exits the whole process");
    assert_eq!(records[3].line, Some(6));
  }

  #[test]
  fn parses_quoted_symbols_and_strings() {
    let source = r#"exclude :'test_pseudo_encoding_inspect(UTF-16)', "needs investigation"
exclude :"test with spaces, and commas", 'single'
exclude "test_plain", "plain"
exclude('test_parens', "in parens") # trailing comment
"#;
    let records = parse_unit("TestTranscode.rb", source).unwrap();
    assert_eq!(
      records,
      vec![
        Record::new("test_pseudo_encoding_inspect(UTF-16)", "needs investigation").at_line(1),
        Record::new("test with spaces, and commas", "single").at_line(2),
        Record::new("test_plain", "plain").at_line(3),
        Record::new("test_parens", "in parens").at_line(4),
      ]
    );
  }

  #[test]
  fn escapes_follow_quote_style() {
    let source = r#"exclude :'it\'s \n raw', "tab\there \"quoted\" #{kept}""#;
    let records = parse_unit("TestEscapes.rb", source).unwrap();
    assert_eq!(records[0].test_id, "it's \\n raw");
    assert_eq!(records[0].reason, "tab\there \"quoted\" #{kept}");
  }

  #[test]
  fn reports_unterminated_literals_with_line() {
    let (line, message) = malformed_line("exclude :a, \"ok\"\nexclude :'test_b, \"reason\"\n");
    assert_eq!(line, Some(2));
    assert!(message.contains("unterminated"), "{message}");

    let (_, message) = malformed_line("exclude :test_c, \"no end");
    assert!(message.contains("unterminated"), "{message}");
  }

  #[test]
  fn reports_missing_reason() {
    let (line, message) = malformed_line("\n\nexclude :test_exit\n");
    assert_eq!(line, Some(3));
    assert_eq!(message, "missing reason for `test_exit`");

    let (_, message) = malformed_line("exclude :test_exit,   ");
    assert_eq!(message, "missing reason for `test_exit`");
  }

  #[test]
  fn rejects_other_malformed_records() {
    let (_, message) = malformed_line("skip :test_exit, \"x\"");
    assert!(message.contains("unknown directive `skip`"), "{message}");

    let (_, message) = malformed_line("excludes :test_exit, \"x\"");
    assert!(message.contains("unknown directive"), "{message}");

    let (_, message) = malformed_line("exclude :, \"x\"");
    assert!(message.contains("expected symbol name"), "{message}");

    let (_, message) = malformed_line("exclude :test_exit \"x\"");
    assert!(message.contains("expected `,`"), "{message}");

    let (_, message) = malformed_line("exclude :test_exit, :reason");
    assert!(message.contains("expected reason string literal"), "{message}");

    let (_, message) = malformed_line("exclude :test_exit, \"x\" extra");
    assert!(message.contains("unexpected trailing input"), "{message}");

    let (_, message) = malformed_line("exclude(:test_exit, \"x\"");
    assert!(message.contains("expected `)`"), "{message}");
  }

  #[test]
  fn error_display_names_unit_and_line() {
    let err = parse_unit("excludes/TestThread.rb", "exclude :test_exit\n").unwrap_err();
    assert_eq!(
      err.to_string(),
      "excludes/TestThread.rb:1: missing reason for `test_exit`"
    );
  }

  #[test]
  fn bare_symbol_detection() {
    assert!(is_bare_symbol("test_exit"));
    assert!(is_bare_symbol("test_thread_variable?"));
    assert!(is_bare_symbol("test_Big5_UAO"));
    assert!(!is_bare_symbol("test_pseudo_encoding_inspect(UTF-16)"));
    assert!(!is_bare_symbol("1test"));
    assert!(!is_bare_symbol(""));
    assert!(!is_bare_symbol("?"));
  }

  #[test]
  fn rendered_units_parse_back_to_the_same_records() {
    let records = vec![
      Record::new("test_exit", "exits the whole process"),
      Record::new("test_handle_interrupted?", "needs investigation"),
      Record::new("test_pseudo_encoding_inspect(UTF-16)", "needs \"more\" #{work}"),
      Record::new("it's odd\\", "back\\slash"),
      Record::new("multi\nline", "tab\there"),
    ];
    let rendered = render_unit(&records);
    assert!(rendered.starts_with("exclude :test_exit, \"exits the whole process\"\n"));
    assert!(rendered.contains("exclude :'test_pseudo_encoding_inspect(UTF-16)', "));

    let parsed: Vec<Record> = parse_unit("roundtrip.rb", &rendered)
      .unwrap()
      .into_iter()
      .map(|r| Record { line: None, ..r })
      .collect();
    assert_eq!(parsed, records);
  }
}
