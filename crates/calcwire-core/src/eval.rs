//! Precedence-aware arithmetic evaluator.
//!
//! Recursive descent over the grammar
//!
//! ```text
//! expression := term   (('+' | '-') term)*
//! term       := factor (('*' | '/') factor)*
//! factor     := number | '(' expression ')'
//! number     := digits with at most one '.'
//! ```
//!
//! Operators are left-associative and all arithmetic is `f64`. Whitespace is
//! skipped at every token boundary. Unary minus is not part of the grammar, so
//! `-5` fails with [`EvalError::NumberExpected`].
//!
//! Before descending, a single pass checks that parentheses balance and that
//! nesting stays within [`MAX_NESTING_DEPTH`]. That bounds the recursion depth
//! of the parser by construction, whatever the peer sends.

use crate::error::EvalError;

/// Maximum parenthesis nesting accepted by [`evaluate`].
pub const MAX_NESTING_DEPTH: usize = 256;

/// Evaluate an arithmetic expression.
///
/// # Errors
///
/// - `EvalError::UnbalancedParen` if parentheses do not pair up
/// - `EvalError::NestingTooDeep` if groups nest deeper than
///   [`MAX_NESTING_DEPTH`]
/// - `EvalError::NumberExpected` where an operand is missing or malformed
/// - `EvalError::DivisionByZero` if a divisor evaluates to zero
/// - `EvalError::TrailingInput` if bytes remain after a complete expression
pub fn evaluate(text: &str) -> Result<f64, EvalError> {
    evaluate_bytes(text.as_bytes())
}

/// Evaluate an expression given as raw bytes.
///
/// Sessions hand their inbound buffer over unchanged; bytes outside the
/// grammar (including invalid UTF-8) simply fail to parse.
pub fn evaluate_bytes(input: &[u8]) -> Result<f64, EvalError> {
    check_parentheses(input)?;

    let mut parser = Parser { input, pos: 0 };
    let value = parser.expression()?;

    parser.skip_whitespace();
    match parser.peek() {
        None => Ok(value),
        Some(b')') => Err(EvalError::UnbalancedParen { position: parser.pos }),
        Some(_) => Err(EvalError::TrailingInput { position: parser.pos }),
    }
}

/// Reject unbalanced or overly deep parenthesis structure up front.
fn check_parentheses(input: &[u8]) -> Result<(), EvalError> {
    let mut depth = 0usize;
    let mut too_deep_at = None;

    for (position, byte) in input.iter().enumerate() {
        match byte {
            b'(' => {
                depth += 1;
                if depth > MAX_NESTING_DEPTH && too_deep_at.is_none() {
                    too_deep_at = Some(position);
                }
            },
            b')' => {
                if depth == 0 {
                    return Err(EvalError::UnbalancedParen { position });
                }
                depth -= 1;
            },
            _ => {},
        }
    }

    if depth > 0 {
        return Err(EvalError::UnbalancedParen { position: input.len() });
    }

    match too_deep_at {
        Some(position) => Err(EvalError::NestingTooDeep { limit: MAX_NESTING_DEPTH, position }),
        None => Ok(()),
    }
}

/// Shared cursor for the descent procedures.
struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expression(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    value += self.term()?;
                },
                Some(b'-') => {
                    self.pos += 1;
                    value -= self.term()?;
                },
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.factor()?;

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    value *= self.factor()?;
                },
                Some(b'/') => {
                    let position = self.pos;
                    self.pos += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(EvalError::DivisionByZero { position });
                    }
                    value /= divisor;
                },
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64, EvalError> {
        self.skip_whitespace();

        if self.peek() != Some(b'(') {
            return self.number();
        }

        self.pos += 1;
        let value = self.expression()?;

        self.skip_whitespace();
        match self.peek() {
            Some(b')') => {
                self.pos += 1;
                Ok(value)
            },
            Some(_) => Err(EvalError::TrailingInput { position: self.pos }),
            None => Err(EvalError::UnbalancedParen { position: self.pos }),
        }
    }

    fn number(&mut self) -> Result<f64, EvalError> {
        let start = self.pos;
        let mut digits = 0usize;
        let mut seen_point = false;

        while let Some(byte) = self.peek() {
            match byte {
                b'0'..=b'9' => digits += 1,
                b'.' if !seen_point => seen_point = true,
                _ => break,
            }
            self.pos += 1;
        }

        if digits == 0 {
            self.pos = start;
            return Err(EvalError::NumberExpected { position: start });
        }

        // The run is ASCII digits and at most one point, so both conversions
        // only fail on inputs the loop above never produces.
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|text| text.parse::<f64>().ok())
            .ok_or(EvalError::NumberExpected { position: start })
    }
}
