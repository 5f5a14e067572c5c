//! Mappings exchanged with the summarization service's submit procedure.
//!
//! The service reads its parameters with `ast.literal_eval` and replies with `str(dict)`, so
//! requests are written as Python literals and replies are read as JSON or Python literals.

use serde_json::{Map, Number, Value};

use crate::types::DocbenchResult;

/// Parse a JSON document or a Python literal made of dicts, lists, tuples, strings, numbers,
/// `True`, `False` and `None`.
pub(crate) fn parse(raw: &str) -> DocbenchResult<Value> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Ok(value);
    }

    let mut parser = Parser {
        chars: raw.chars().collect(),
        pos: 0,
    };
    let value = parser.value()?;
    parser.skip_whitespace();
    if parser.pos != parser.chars.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

/// Render a value as a Python literal that `ast.literal_eval` accepts.
pub(crate) fn to_python(value: &Value) -> String {
    let mut out = String::new();
    write_python(value, &mut out);
    out
}

fn write_python(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => out.push_str(&n.to_string()),
        // JSON string escapes are all valid in Python string literals.
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_python(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push_str(": ");
                write_python(item, out);
            }
            out.push('}');
        }
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn error(&self, reason: &str) -> anyhow::Error {
        anyhow::anyhow!("Invalid literal at character {}: {reason}", self.pos)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> DocbenchResult<()> {
        self.skip_whitespace();
        match self.next() {
            Some(c) if c == expected => Ok(()),
            _ => Err(self.error(&format!("expected '{expected}'"))),
        }
    }

    fn value(&mut self) -> DocbenchResult<Value> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => self.dict(),
            Some('[') => {
                let (items, _) = self.sequence('[', ']')?;
                Ok(Value::Array(items))
            }
            Some('(') => {
                let (mut items, trailing_comma) = self.sequence('(', ')')?;
                // `(x)` is only a parenthesized value, `(x,)` is a tuple.
                if items.len() == 1 && !trailing_comma {
                    return Ok(items.remove(0));
                }
                Ok(Value::Array(items))
            }
            Some('\'' | '"') => self.string().map(Value::String),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() => self.word(),
            Some(c) => Err(self.error(&format!("unexpected '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn dict(&mut self) -> DocbenchResult<Value> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }

            let key = match self.value()? {
                Value::String(s) => s,
                Value::Array(_) | Value::Object(_) => {
                    return Err(self.error("dict keys must be scalars"))
                }
                scalar => scalar.to_string(),
            };
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);

            self.skip_whitespace();
            match self.next() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(map)),
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    /// Items between `open` and `close`, and whether the last item was followed by a comma.
    fn sequence(&mut self, open: char, close: char) -> DocbenchResult<(Vec<Value>, bool)> {
        self.expect(open)?;
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok((items, trailing_comma));
            }

            items.push(self.value()?);
            self.skip_whitespace();
            match self.next() {
                Some(',') => trailing_comma = true,
                Some(c) if c == close => return Ok((items, false)),
                _ => return Err(self.error(&format!("expected ',' or '{close}'"))),
            }
        }
    }

    fn string(&mut self) -> DocbenchResult<String> {
        let quote = self.next().ok_or_else(|| self.error("expected a string"))?;
        let mut out = String::new();
        loop {
            match self.next() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => self.escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> DocbenchResult<()> {
        let escaped = match self.next() {
            None => return Err(self.error("unterminated escape")),
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('0') => '\0',
            Some('\n') => return Ok(()),
            Some(c @ ('\\' | '\'' | '"')) => c,
            Some('x') => return self.code_point(2, out),
            Some('u') => return self.code_point(4, out),
            Some('U') => return self.code_point(8, out),
            // Python keeps unknown escapes as written.
            Some(c) => {
                out.push('\\');
                c
            }
        };
        out.push(escaped);
        Ok(())
    }

    fn code_point(&mut self, digits: usize, out: &mut String) -> DocbenchResult<()> {
        let end = self.pos + digits;
        if end > self.chars.len() {
            return Err(self.error("truncated escape"));
        }
        let hex = self.chars[self.pos..end].iter().collect::<String>();
        let c = u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(&format!("invalid escape \\{hex}")))?;
        self.pos = end;
        out.push(c);
        Ok(())
    }

    fn number(&mut self) -> DocbenchResult<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_'))
        {
            self.pos += 1;
        }
        let text = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect::<String>();

        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Number(n.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| self.error(&format!("invalid number {text}")))
    }

    fn word(&mut self) -> DocbenchResult<Value> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word = self.chars[start..self.pos].iter().collect::<String>();
        match word.as_str() {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            // String prefixes, `r'..'` keeps backslashes.
            "r" | "R" if matches!(self.peek(), Some('\'' | '"')) => self.raw_string().map(Value::String),
            "u" | "U" if matches!(self.peek(), Some('\'' | '"')) => self.string().map(Value::String),
            _ => {
                self.pos = start;
                Err(self.error(&format!("unsupported name {word}")))
            }
        }
    }

    fn raw_string(&mut self) -> DocbenchResult<String> {
        let quote = self.next().ok_or_else(|| self.error("expected a string"))?;
        let mut out = String::new();
        loop {
            match self.next() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    out.push('\\');
                    if let Some(c) = self.next() {
                        out.push(c);
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }
}
