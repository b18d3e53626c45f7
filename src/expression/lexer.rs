//! Tokenizer for the expression language.

use super::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string '{}'", s),
            Token::Ident(name) => format!("'{}'", name),
            Token::Punct(p) => format!("'{}'", p),
            Token::Eof => "end of expression".to_string(),
        }
    }
}

// Longest operators first so `===` wins over `==`.
const PUNCTUATION: &[&str] = &[
    "===", "!==", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "+", "-", "*",
    "/", "%", "<", ">", "!", "?", ":", ".", ",", "(", ")", "[", "]", "{", "}",
];

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        let next_is_digit = chars.get(pos + 1).map(|n| n.is_ascii_digit()).unwrap_or(false);
        if c.is_ascii_digit() || (c == '.' && next_is_digit) {
            let (number, end) = lex_number(&chars, pos)?;
            tokens.push(Token::Number(number));
            pos = end;
            continue;
        }

        if c == '"' || c == '\'' || c == '`' {
            let (text, end) = lex_string(&chars, pos)?;
            tokens.push(Token::Str(text));
            pos = end;
            continue;
        }

        if is_ident_start(c) {
            let start = pos;
            while pos < chars.len() && is_ident_continue(chars[pos]) {
                pos += 1;
            }
            tokens.push(Token::Ident(chars[start..pos].iter().collect()));
            continue;
        }

        let rest: String = chars[pos..chars.len().min(pos + 3)].iter().collect();
        let punct = PUNCTUATION.iter().find(|p| {
            // `?.5` is a ternary followed by a number, not optional chaining.
            if **p == "?." {
                rest.starts_with("?.")
                    && !chars.get(pos + 2).map(|n| n.is_ascii_digit()).unwrap_or(false)
            } else {
                rest.starts_with(**p)
            }
        });
        match punct {
            Some(p) => {
                tokens.push(Token::Punct(*p));
                pos += p.chars().count();
            }
            None => {
                return Err(EvalError::new(format!(
                    "Unexpected character '{}' at position {}",
                    c, pos
                )))
            }
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize) -> Result<(f64, usize), EvalError> {
    let mut pos = start;
    while pos < chars.len() && chars[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < chars.len()
        && chars[pos] == '.'
        && chars.get(pos + 1).map(|c| c.is_ascii_digit()).unwrap_or(false)
    {
        pos += 1;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
        let mut exp = pos + 1;
        if exp < chars.len() && (chars[exp] == '+' || chars[exp] == '-') {
            exp += 1;
        }
        if exp < chars.len() && chars[exp].is_ascii_digit() {
            pos = exp;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }
    let text: String = chars[start..pos].iter().collect();
    text.parse::<f64>()
        .map(|n| (n, pos))
        .map_err(|_| EvalError::new(format!("Invalid number '{}'", text)))
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), EvalError> {
    let quote = chars[start];
    let mut pos = start + 1;
    let mut out = String::new();

    while pos < chars.len() {
        let c = chars[pos];
        if c == quote {
            return Ok((out, pos + 1));
        }
        if c == '\\' {
            pos += 1;
            let Some(&escaped) = chars.get(pos) else {
                break;
            };
            match escaped {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                'u' => {
                    let hex: String = chars.iter().skip(pos + 1).take(4).collect();
                    let code = u32::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| hex.len() == 4)
                        .and_then(char::from_u32)
                        .ok_or_else(|| EvalError::new(format!("Invalid unicode escape '\\u{}'", hex)))?;
                    out.push(code);
                    pos += 4;
                }
                other => out.push(other),
            }
            pos += 1;
            continue;
        }
        out.push(c);
        pos += 1;
    }

    Err(EvalError::new("Unterminated string literal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_mixed() {
        let tokens = tokenize("$json.price * 1.5 >= 10").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("$json".into()),
                Token::Punct("."),
                Token::Ident("price".into()),
                Token::Punct("*"),
                Token::Number(1.5),
                Token::Punct(">="),
                Token::Number(10.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_strings_and_escapes() {
        let tokens = tokenize(r#"'it\'s' + "a\tb" + `x`"#).unwrap();
        assert_eq!(tokens[0], Token::Str("it's".into()));
        assert_eq!(tokens[2], Token::Str("a\tb".into()));
        assert_eq!(tokens[4], Token::Str("x".into()));
    }

    #[test]
    fn test_tokenize_longest_operator() {
        let tokens = tokenize("a === b ?. c ?? d").unwrap();
        assert_eq!(tokens[1], Token::Punct("==="));
        assert_eq!(tokens[3], Token::Punct("?."));
        assert_eq!(tokens[5], Token::Punct("??"));
    }

    #[test]
    fn test_tokenize_errors() {
        assert!(tokenize("'open").is_err());
        assert!(tokenize("a # b").is_err());
    }
}
