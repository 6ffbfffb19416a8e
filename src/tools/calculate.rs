//! Calculator tool: an in-process expression evaluator.
//!
//! Recursive-descent parser over an operator allow-list
//! (`+ - * / % ^`, parentheses, unary minus). Nothing shells out; the
//! expression never leaves the process.

use serde_json::{Value, json};

use super::{Caps, Tool, ToolContext, ToolOutcome, ToolSpec, require_str};

/// Evaluate arithmetic expressions without spawning anything.
pub struct CalculateTool;

impl Tool for CalculateTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "calculate".into(),
            description: "Evaluate a mathematical expression (+ - * / % ^, parentheses).".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "Math expression, e.g. 2+2 or (1+3)*5"
                    }
                },
                "required": ["expression"]
            }),
            required_caps: Caps::NONE,
        }
    }

    fn execute(&self, args: &Value, _ctx: &ToolContext) -> ToolOutcome {
        let expression = match require_str(args, "expression") {
            Ok(e) => e,
            Err(e) => return ToolOutcome::err(e),
        };
        match eval(expression) {
            Ok(value) => ToolOutcome::ok(format_number(value)),
            Err(e) => ToolOutcome::err(format!("cannot evaluate \"{expression}\": {e}")),
        }
    }
}

/// Render integers without a trailing `.0`, everything else as f64.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Evaluate an expression string.
pub fn eval(expression: &str) -> Result<f64, String> {
    let mut parser = Parser {
        bytes: expression.as_bytes(),
        pos: 0,
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(format!("unexpected character at position {}", parser.pos));
    }
    if !value.is_finite() {
        return Err("result is not finite".into());
    }
    Ok(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    /// expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                b'+' => {
                    self.pos += 1;
                    value += self.term()?;
                }
                b'-' => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    /// term := power (('*' | '/' | '%') power)*
    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.power()?;
        while let Some(op) = self.peek() {
            match op {
                b'*' => {
                    self.pos += 1;
                    value *= self.power()?;
                }
                b'/' => {
                    self.pos += 1;
                    let rhs = self.power()?;
                    if rhs == 0.0 {
                        return Err("division by zero".into());
                    }
                    value /= rhs;
                }
                b'%' => {
                    self.pos += 1;
                    let rhs = self.power()?;
                    if rhs == 0.0 {
                        return Err("modulo by zero".into());
                    }
                    value %= rhs;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    /// power := unary ('^' power)?   (right-associative)
    fn power(&mut self) -> Result<f64, String> {
        let base = self.unary()?;
        if self.peek() == Some(b'^') {
            self.pos += 1;
            let exponent = self.power()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    /// unary := '-' power | primary
    ///
    /// The minus routes back through the `^` level, so it binds looser
    /// than exponentiation: `-2^2` is `-(2^2)`, matching bc.
    fn unary(&mut self) -> Result<f64, String> {
        if self.peek() == Some(b'-') {
            self.pos += 1;
            return Ok(-self.power()?);
        }
        self.primary()
    }

    /// primary := number | '(' expr ')'
    fn primary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err("missing closing parenthesis".into());
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => {
                let start = self.pos;
                while self
                    .bytes
                    .get(self.pos)
                    .is_some_and(|&c| c.is_ascii_digit() || c == b'.')
                {
                    self.pos += 1;
                }
                let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
                text.parse::<f64>()
                    .map_err(|_| format!("bad number \"{text}\""))
            }
            Some(c) => Err(format!("operator {:?} is not allowed", c as char)),
            None => Err("unexpected end of expression".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_arithmetic() {
        assert_eq!(eval("2+2").unwrap(), 4.0);
        assert_eq!(eval("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(eval("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(eval("10 / 4").unwrap(), 2.5);
        assert_eq!(eval("10 % 3").unwrap(), 1.0);
    }

    #[test]
    fn unary_minus_and_power() {
        assert_eq!(eval("-3 + 5").unwrap(), 2.0);
        assert_eq!(eval("2^10").unwrap(), 1024.0);
        // Right-associative: 2^(3^2) = 512.
        assert_eq!(eval("2^3^2").unwrap(), 512.0);
        // Unary minus binds looser than '^': -(2^2).
        assert_eq!(eval("-2^2").unwrap(), -4.0);
        assert_eq!(eval("2^-2").unwrap(), 0.25);
        assert_eq!(eval("(-2)^2").unwrap(), 4.0);
    }

    #[test]
    fn errors_are_reported_not_panicked() {
        assert!(eval("2+").is_err());
        assert!(eval("1/0").is_err());
        assert!(eval("(1+2").is_err());
        assert!(eval("2 & 3").is_err());
        assert!(eval("system(1)").is_err());
    }

    #[test]
    fn tool_formats_integers_cleanly() {
        let out = CalculateTool.execute(
            &serde_json::json!({"expression": "2+2"}),
            &ToolContext::new(),
        );
        assert!(out.success);
        assert_eq!(out.output.as_deref(), Some("4"));

        let out = CalculateTool.execute(
            &serde_json::json!({"expression": "7/2"}),
            &ToolContext::new(),
        );
        assert_eq!(out.output.as_deref(), Some("3.5"));
    }
}
