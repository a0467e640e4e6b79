//! Condition and indicator-declaration parser.
//!
//! Recursive descent over two small grammars:
//!
//! ```text
//! conditions := condition (';' condition)* ';'?
//! condition  := ref comparison (number | ref)
//! comparison := above | below | crosses_above | crosses_below
//! ref        := ident ('.' component)?
//!
//! indicator  := SMA(p) | EMA(p) | RSI(p) | MACD(f, s, sig) | BOLLINGER(p[, m])
//! ```
//!
//! Errors carry the character offset and the expected/found tokens.

use crate::domain::condition::{Comparison, Condition, IndicatorRef, Target};
use crate::domain::error::ParseError;
use crate::domain::indicator::{IndicatorField, IndicatorType};

const DEFAULT_BOLLINGER_MULTIPLIER: f64 = 2.0;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.peek().is_none()
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn consume_char(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek_word(&self) -> String {
        let mut word = String::new();
        for ch in self.remaining().chars() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
            } else {
                break;
            }
        }
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch.is_alphabetic() || ch == '_' => {}
            _ => {
                return Err(self.error(format!(
                    "expected indicator name, found '{}'",
                    self.peek_word()
                )));
            }
        }
        let word = self.peek_word();
        self.pos += word.len();
        Ok(word)
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut digits = 0;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected integer".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid integer: {}", num_str),
            position: start,
        })
    }

    fn parse_ref(&mut self) -> Result<IndicatorRef, ParseError> {
        let name = self.parse_identifier()?;
        if self.peek() != Some('.') {
            return Ok(IndicatorRef::value(name));
        }
        self.advance();

        let component_pos = self.pos;
        let component = self.peek_word();
        let field = match component.as_str() {
            "line" | "middle" => IndicatorField::Value,
            "signal" => IndicatorField::MacdSignal,
            "histogram" => IndicatorField::MacdHistogram,
            "upper" => IndicatorField::BollingerUpper,
            "lower" => IndicatorField::BollingerLower,
            _ => {
                return Err(ParseError {
                    message: format!(
                        "expected component (line, signal, histogram, upper, middle, lower), found '{}'",
                        component
                    ),
                    position: component_pos,
                });
            }
        };
        self.pos += component.len();
        Ok(IndicatorRef::with_field(name, field))
    }

    fn parse_comparison(&mut self) -> Result<Comparison, ParseError> {
        self.skip_whitespace();
        let word = self.peek_word();
        let comparison = match word.as_str() {
            "above" => Comparison::Above,
            "below" => Comparison::Below,
            "crosses_above" => Comparison::CrossesAbove,
            "crosses_below" => Comparison::CrossesBelow,
            _ => {
                return Err(self.error(format!(
                    "expected comparison (above, below, crosses_above, crosses_below), found '{}'",
                    word
                )));
            }
        };
        self.pos += word.len();
        Ok(comparison)
    }

    fn parse_target(&mut self) -> Result<Target, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch.is_ascii_digit() || ch == '-' || ch == '.' => {
                Ok(Target::Value(self.parse_number()?))
            }
            Some(_) => Ok(Target::Indicator(self.parse_ref()?)),
            None => Err(self.error("expected number or indicator, found end of input")),
        }
    }

    fn parse_condition(&mut self) -> Result<Condition, ParseError> {
        let indicator = self.parse_ref()?;
        let comparison = self.parse_comparison()?;
        let target = self.parse_target()?;
        Ok(Condition {
            indicator,
            comparison,
            target,
        })
    }

    fn parse_conditions(&mut self) -> Result<Vec<Condition>, ParseError> {
        let mut conditions = Vec::new();
        while !self.at_end() {
            conditions.push(self.parse_condition()?);
            if !self.consume_char(';') && !self.at_end() {
                return Err(self.error(format!(
                    "expected ';' or end of input, found '{}'",
                    self.peek_word()
                )));
            }
        }
        Ok(conditions)
    }

    fn parse_indicator_type(&mut self) -> Result<IndicatorType, ParseError> {
        self.skip_whitespace();
        let name_pos = self.pos;
        let name = self.peek_word();
        self.pos += name.len();

        let indicator = match name.to_ascii_uppercase().as_str() {
            "SMA" => {
                self.expect_char('(')?;
                let period = self.parse_integer()?;
                IndicatorType::Sma { period }
            }
            "EMA" => {
                self.expect_char('(')?;
                let period = self.parse_integer()?;
                IndicatorType::Ema { period }
            }
            "RSI" => {
                self.expect_char('(')?;
                let period = self.parse_integer()?;
                IndicatorType::Rsi { period }
            }
            "MACD" => {
                self.expect_char('(')?;
                let fast = self.parse_integer()?;
                self.expect_char(',')?;
                let slow = self.parse_integer()?;
                self.expect_char(',')?;
                let signal = self.parse_integer()?;
                IndicatorType::Macd { fast, slow, signal }
            }
            "BOLLINGER" | "BB" => {
                self.expect_char('(')?;
                let period = self.parse_integer()?;
                let multiplier = if self.consume_char(',') {
                    self.parse_number()?
                } else {
                    DEFAULT_BOLLINGER_MULTIPLIER
                };
                IndicatorType::Bollinger { period, multiplier }
            }
            _ => {
                return Err(ParseError {
                    message: format!(
                        "unknown indicator '{}' (expected SMA, EMA, RSI, MACD, BOLLINGER)",
                        name
                    ),
                    position: name_pos,
                });
            }
        };
        self.expect_char(')')?;
        Ok(indicator)
    }

    fn finish(&mut self) -> Result<(), ParseError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error(format!(
                "unexpected trailing input '{}'",
                self.remaining().trim_end()
            )))
        }
    }
}

/// Parse a `;`-separated list of conditions. Blank input yields an empty list.
pub fn parse_conditions(input: &str) -> Result<Vec<Condition>, ParseError> {
    let mut parser = Parser::new(input);
    parser.parse_conditions()
}

/// Parse a single condition clause.
pub fn parse_condition(input: &str) -> Result<Condition, ParseError> {
    let mut parser = Parser::new(input);
    let condition = parser.parse_condition()?;
    parser.finish()?;
    Ok(condition)
}

pub fn parse_indicator_ref(input: &str) -> Result<IndicatorRef, ParseError> {
    let mut parser = Parser::new(input);
    let r = parser.parse_ref()?;
    parser.finish()?;
    Ok(r)
}

/// Parse an indicator declaration such as `MACD(12,26,9)`.
pub fn parse_indicator_type(input: &str) -> Result<IndicatorType, ParseError> {
    let mut parser = Parser::new(input);
    let indicator = parser.parse_indicator_type()?;
    parser.finish()?;
    Ok(indicator)
}
