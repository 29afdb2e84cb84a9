//! POSIX-like argument tokenizer (`§6.4`).
//!
//! No environment expansion, no globbing, no comments — just quoting and
//! backslash escaping, with rune-index spans so a completion UI can map a
//! cursor position back to the token it falls inside.

use compact_str::CompactString;

/// One token plus the rune-index span (both ends inclusive: `end` is the
/// index of the token's last content rune, never extended to cover a
/// closing quote) it was read from in the original input, and the quote
/// rune that produced it (`'`, `"`, or `\0` for an unquoted run).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub text: CompactString,
  pub start: usize,
  pub end: usize,
  pub quote: char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
  Bare,
  Single,
  Double,
}

/// Tokenizes `input` per `§6.4`. Never errors: an unterminated quote or a
/// trailing escape simply closes out the token with whatever was
/// accumulated, matching the "no comments, no expansion" minimalism of the
/// source tokenizer.
pub fn tokenize(input: &str) -> Vec<Token> {
  let runes: Vec<char> = input.chars().collect();
  let mut tokens = Vec::new();

  let mut i = 0;
  while i < runes.len() {
    if runes[i].is_whitespace() {
      i += 1;
      continue;
    }

    let start = i;
    let mut text = String::new();
    let mut mode = Mode::Bare;
    // The quote rune recorded for the token: the first quote character
    // encountered, or `\0` if the token is (or starts) unquoted.
    let mut quote = '\0';
    // Index of the last source rune that contributed to this token
    // (content or delimiter consumed while producing it); `end` is this
    // index, inclusive, per the `§6.4` span convention.
    let mut last_index = start;

    loop {
      if i >= runes.len() {
        break;
      }
      let c = runes[i];

      match mode {
        Mode::Bare => {
          if c.is_whitespace() {
            break;
          } else if c == '\'' {
            if quote == '\0' {
              quote = '\'';
            }
            mode = Mode::Single;
            last_index = i;
            i += 1;
          } else if c == '"' {
            if quote == '\0' {
              quote = '"';
            }
            mode = Mode::Double;
            last_index = i;
            i += 1;
          } else if c == '\\' {
            i += 1;
            if i >= runes.len() {
              break;
            }
            if runes[i] == '\n' {
              // Line continuation: glue one following run of whitespace
              // into a single literal space (`§6.4`).
              let esc_end = i;
              i += 1;
              while i < runes.len() && runes[i].is_whitespace() && runes[i] != '\n' {
                i += 1;
              }
              text.push(' ');
              last_index = if i > esc_end + 1 { i - 1 } else { esc_end };
            } else {
              text.push(runes[i]);
              last_index = i;
              i += 1;
            }
          } else {
            text.push(c);
            last_index = i;
            i += 1;
          }
        }
        Mode::Single => {
          if c == '\'' {
            mode = Mode::Bare;
          } else {
            text.push(c);
            last_index = i;
          }
          i += 1;
        }
        Mode::Double => {
          if c == '"' {
            mode = Mode::Bare;
            i += 1;
          } else if c == '\\' {
            i += 1;
            if i >= runes.len() {
              break;
            }
            match runes[i] {
              '$' | '`' | '"' | '\\' | '\n' => {
                text.push(runes[i]);
                last_index = i;
                i += 1;
              }
              other => {
                // Not one of the escapable runes: the backslash is
                // preserved literally alongside it.
                text.push('\\');
                text.push(other);
                last_index = i;
                i += 1;
              }
            }
          } else {
            text.push(c);
            last_index = i;
            i += 1;
          }
        }
      }
    }

    tokens.push(Token {
      text: CompactString::from(text),
      start,
      end: last_index,
      quote,
    });
  }

  tokens
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quoting_and_spans() {
    let tokens = tokenize(r#"cmd 'arg with spaces' "and $var" end"#);
    let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["cmd", "arg with spaces", "and $var", "end"]);

    let third = &tokens[2];
    assert_eq!(third.start, 22);
    assert_eq!(third.end, 30);
    assert_eq!(third.quote, '"');
  }

  #[test]
  fn line_continuation_glues_one_space() {
    let tokens = tokenize("a\\\n   \tb");
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].text.as_str(), "a b");
  }

  #[test]
  fn single_quotes_are_fully_literal() {
    let tokens = tokenize(r#"'$var `cmd` "q" \n'"#);
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].text.as_str(), r#"$var `cmd` "q" \n"#);
  }

  #[test]
  fn unquoted_backslash_escapes_next_rune() {
    let tokens = tokenize(r"a\ b");
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].text.as_str(), "a b");
  }
}
