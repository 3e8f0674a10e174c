//! Human-readable messages for failed HTTP responses.
//!
//! Services answer failures in three shapes: `{"error": {"message": ...}}`,
//! `{"error_message": "..."}` where the message may itself embed a
//! Python-style dict (`Error code: 429 - {'error': {'message': '...'}}`), or a
//! body that is not JSON at all. The embedded dict is read with a small
//! literal parser; nothing is evaluated.

use serde_json::{Map, Number, Value};

/// Characters of a non-JSON body kept in the message.
pub const ERROR_BODY_SNIPPET_LEN: usize = 200;

const FORMATTED_PREFIX: &str = "Error code: ";

/// Builds the message for a non-success response.
pub fn describe_http_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(fields)) => describe_json_error(&fields, status),
        _ => format!("Code: {status}, Error: {}", snippet(body)),
    }
}

fn describe_json_error(fields: &Map<String, Value>, status: u16) -> String {
    if let Some(error) = fields.get("error").filter(|error| is_truthy(error)) {
        return describe_error_value(error, status);
    }

    let error_message = fields
        .get("error_message")
        .cloned()
        .unwrap_or_else(|| Value::String("Unknown error".to_string()));

    match &error_message {
        Value::String(text) if is_formatted_error(text) => parse_formatted_error(text),
        other => describe_error_value(other, status),
    }
}

fn describe_error_value(error: &Value, status: u16) -> String {
    match error.get("message") {
        Some(message) => format!("Code: {status}, Error: {}", display_value(message)),
        None => format!("Code: {status}, Error: {}", display_value(error)),
    }
}

/// Whether `text` looks like `Error code: X - {'error': ...}`.
pub fn is_formatted_error(text: &str) -> bool {
    text.contains("Error code:") && text.contains("{'error':")
}

/// Extracts code and message from `Error code: X - {'error': {'message': Y}}`.
///
/// Falls back to `Error: <text>` when the text does not parse.
pub fn parse_formatted_error(text: &str) -> String {
    try_parse_formatted_error(text).unwrap_or_else(|| format!("Error: {text}"))
}

fn try_parse_formatted_error(text: &str) -> Option<String> {
    let (head, literal) = text.split_once(" - ")?;
    let code = head.replace(FORMATTED_PREFIX, "");
    let parsed = parse_literal(literal)?;
    let message = parsed.get("error")?.get("message")?;
    Some(format!("Code: {}, Error: {}", code.trim(), display_value(message)))
}

/// Truncates `body` to [`ERROR_BODY_SNIPPET_LEN`] characters, adding `...`.
pub fn snippet(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(ERROR_BODY_SNIPPET_LEN).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
    }
}

/// Parses a Python literal (dict, list, tuple, str, int, float, bool, None)
/// into JSON. Returns `None` on any syntax the parser does not know.
pub fn parse_literal(input: &str) -> Option<Value> {
    let mut parser = LiteralParser {
        chars: input.char_indices().peekable(),
        input,
    };
    let value = parser.value()?;
    parser.skip_ws();
    parser.chars.peek().is_none().then_some(value)
}

struct LiteralParser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
}

impl LiteralParser<'_> {
    fn skip_ws(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.peek().map(|(_, c)| *c)
    }

    fn eat(&mut self, expected: char) -> Option<()> {
        (self.peek()? == expected).then(|| {
            self.chars.next();
        })
    }

    fn value(&mut self) -> Option<Value> {
        match self.peek()? {
            '{' => self.dict(),
            '[' => self.sequence('[', ']'),
            '(' => self.sequence('(', ')'),
            '\'' | '"' => self.string().map(Value::String),
            c if c == '-' || c == '+' || c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() => self.keyword(),
            _ => None,
        }
    }

    fn dict(&mut self) -> Option<Value> {
        self.eat('{')?;
        let mut fields = Map::new();
        if self.eat('}').is_some() {
            return Some(Value::Object(fields));
        }
        loop {
            let key = match self.value()? {
                Value::String(key) => key,
                other => other.to_string(),
            };
            self.eat(':')?;
            let value = self.value()?;
            fields.insert(key, value);
            if self.eat(',').is_some() {
                if self.eat('}').is_some() {
                    return Some(Value::Object(fields));
                }
                continue;
            }
            self.eat('}')?;
            return Some(Value::Object(fields));
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Option<Value> {
        self.eat(open)?;
        let mut items = Vec::new();
        if self.eat(close).is_some() {
            return Some(Value::Array(items));
        }
        loop {
            items.push(self.value()?);
            if self.eat(',').is_some() {
                if self.eat(close).is_some() {
                    return Some(Value::Array(items));
                }
                continue;
            }
            self.eat(close)?;
            return Some(Value::Array(items));
        }
    }

    fn string(&mut self) -> Option<String> {
        let (_, quote) = self.chars.next()?;
        let mut out = String::new();
        loop {
            let (_, c) = self.chars.next()?;
            match c {
                '\\' => {
                    let (_, escaped) = self.chars.next()?;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                }
                c if c == quote => return Some(out),
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Option<Value> {
        let (start, _) = *self.chars.peek()?;
        let mut end = start;
        while let Some((index, c)) = self
            .chars
            .next_if(|(_, c)| c.is_ascii_digit() || matches!(*c, '-' | '+' | '.' | 'e' | 'E' | '_'))
        {
            end = index + c.len_utf8();
        }
        let raw = self.input[start..end].replace('_', "");
        if let Ok(int) = raw.parse::<i64>() {
            return Some(Value::Number(int.into()));
        }
        raw.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    }

    fn keyword(&mut self) -> Option<Value> {
        let mut word = String::new();
        while let Some((_, c)) = self.chars.next_if(|(_, c)| c.is_alphanumeric() || *c == '_') {
            word.push(c);
        }
        match word.as_str() {
            "True" => Some(Value::Bool(true)),
            "False" => Some(Value::Bool(false)),
            "None" => Some(Value::Null),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{describe_http_error, parse_formatted_error, parse_literal, snippet};

    #[test]
    fn structured_error_message() {
        let body = r#"{"error":{"message":"Invalid model"}}"#;
        assert_eq!(describe_http_error(400, body), "Code: 400, Error: Invalid model");
    }

    #[test]
    fn plain_error_field() {
        let body = r#"{"error":"bucket missing"}"#;
        assert_eq!(describe_http_error(404, body), "Code: 404, Error: bucket missing");
    }

    #[test]
    fn error_message_field_with_embedded_literal() {
        let body = json!({
            "error_message": "Error code: 429 - {'error': {'message': 'Rate limit reached', 'type': 'requests', 'param': None, 'code': 'rate_limit_exceeded'}}",
            "status": "error",
        })
        .to_string();
        assert_eq!(
            describe_http_error(500, &body),
            "Code: 429, Error: Rate limit reached"
        );
    }

    #[test]
    fn error_message_object_and_default() {
        let with_message = r#"{"error_message":{"message":"model offline"}}"#;
        assert_eq!(
            describe_http_error(503, with_message),
            "Code: 503, Error: model offline"
        );
        assert_eq!(describe_http_error(500, "{}"), "Code: 500, Error: Unknown error");
        assert_eq!(
            describe_http_error(500, r#"{"error":"","error_message":"late"}"#),
            "Code: 500, Error: late"
        );
    }

    #[test]
    fn garbled_literal_falls_back_to_raw_text() {
        let text = "Error code: 500 - {'error': {'message': 'unterminated";
        assert_eq!(parse_formatted_error(text), format!("Error: {text}"));
    }

    #[test]
    fn non_json_body_is_truncated() {
        let body = "x".repeat(250);
        let message = describe_http_error(502, &body);
        assert_eq!(message, format!("Code: 502, Error: {}...", "x".repeat(200)));
        assert_eq!(snippet("short"), "short");
        assert_eq!(describe_http_error(500, ""), "Code: 500, Error: ");
    }

    #[test]
    fn literal_parser_handles_python_values() {
        let parsed = parse_literal(
            r#"{'a': [1, 2.5, -3], "b": (True, False, None), 'c': 'it\'s', 'd': {},}"#,
        )
        .expect("parse");
        assert_eq!(
            parsed,
            json!({"a": [1, 2.5, -3], "b": [true, false, null], "c": "it's", "d": {}})
        );
        assert_eq!(parse_literal("__import__('os')"), None);
        assert_eq!(parse_literal("{'a': 1} trailing"), None);
    }
}
