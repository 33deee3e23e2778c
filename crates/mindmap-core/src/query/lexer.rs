// Tokenizer for the MATCH query language.
//
// Keywords are not distinguished here; the parser compares identifiers
// case-insensitively so literal text keeps its original case.

use mindmap_common::QueryError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Param(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
    Star,
    Dash,
    Arrow,
    LeftArrow,
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, QueryError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (token, consumed) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '{' => (Token::LBrace, 1),
            '}' => (Token::RBrace, 1),
            ':' => (Token::Colon, 1),
            ',' => (Token::Comma, 1),
            '.' => (Token::Dot, 1),
            '*' => (Token::Star, 1),
            '=' => (Token::Eq, 1),
            '-' if next == Some('>') => (Token::Arrow, 2),
            '-' => (Token::Dash, 1),
            '!' if next == Some('=') => (Token::Ne, 2),
            '<' if next == Some('>') => (Token::Ne, 2),
            '<' if next == Some('=') => (Token::Lte, 2),
            '<' if next == Some('-') => (Token::LeftArrow, 2),
            '<' => (Token::Lt, 1),
            '>' if next == Some('=') => (Token::Gte, 2),
            '>' => (Token::Gt, 1),
            '"' | '\'' => {
                let (text, consumed) = read_string(&chars, i, c)?;
                (Token::Str(text), consumed)
            }
            '$' => {
                let name: String = chars[i + 1..].iter()
                    .map(|&(_, c)| c)
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if name.is_empty() {
                    return Err(QueryError::Parse(format!("empty parameter name at offset {}", offset)));
                }
                let consumed = name.chars().count() + 1;
                (Token::Param(name), consumed)
            }
            c if c.is_ascii_digit() => read_number(&chars, i)?,
            c if c.is_alphabetic() || c == '_' => {
                let word: String = chars[i..].iter()
                    .map(|&(_, c)| c)
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                let consumed = word.chars().count();
                (Token::Ident(word), consumed)
            }
            other => {
                return Err(QueryError::Parse(format!(
                    "unexpected character '{}' at offset {}",
                    other, offset
                )));
            }
        };

        tokens.push(Spanned { token, offset });
        i += consumed;
    }

    Ok(tokens)
}

fn read_string(chars: &[(usize, char)], start: usize, quote: char) -> Result<(String, usize), QueryError> {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == '\\' {
            if let Some(&(_, escaped)) = chars.get(i + 1) {
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
                continue;
            }
        }
        if c == quote {
            return Ok((text, i - start + 1));
        }
        text.push(c);
        i += 1;
    }
    Err(QueryError::Parse(format!("unterminated string starting at offset {}", chars[start].0)))
}

fn read_number(chars: &[(usize, char)], start: usize) -> Result<(Token, usize), QueryError> {
    let digits = |from: usize| chars[from..].iter().take_while(|(_, c)| c.is_ascii_digit()).count();

    let int_len = digits(start);
    let has_fraction = chars.get(start + int_len).map(|&(_, c)| c) == Some('.')
        && chars.get(start + int_len + 1).is_some_and(|&(_, c)| c.is_ascii_digit());

    let len = if has_fraction {
        int_len + 1 + digits(start + int_len + 1)
    } else {
        int_len
    };
    let text: String = chars[start..start + len].iter().map(|&(_, c)| c).collect();
    let offset = chars[start].0;

    let token = if has_fraction {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|e| QueryError::Parse(format!("invalid number '{}' at offset {}: {}", text, offset, e)))?
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|e| QueryError::Parse(format!("invalid integer '{}' at offset {}: {}", text, offset, e)))?
    };
    Ok((token, len))
}
