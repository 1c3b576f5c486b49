//! American odds parsing and conversions.
//!
//! Odds strings arrive from sportsbooks in forms like "-150", "+130",
//! "EVEN", "PK" or "130 (best)". Parsing is a small explicit tokenizer
//! (sign, digits, optional trailing parenthetical) rather than a stack of
//! string-splitting heuristics.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures while parsing an American odds string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OddsParseError {
    #[error("empty odds string")]
    Empty,
    #[error("invalid character {found:?} at position {position}")]
    InvalidChar { found: char, position: usize },
    #[error("odds magnitude {0} below the American minimum of 100")]
    BelowMinimum(i32),
    #[error("trailing input after odds value: {0:?}")]
    TrailingInput(String),
}

/// A validated American odds value. Positive values are underdog prices
/// (+130), negative values are favorite prices (-150). Magnitude is
/// always >= 100.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmericanOdds(i32);

impl AmericanOdds {
    pub fn new(value: i32) -> Result<Self, OddsParseError> {
        if value.abs() < 100 {
            return Err(OddsParseError::BelowMinimum(value));
        }
        Ok(AmericanOdds(value))
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    /// Stake multiplier on win. +130 -> 2.30, -150 -> 1.667.
    pub fn to_decimal(&self) -> f64 {
        american_to_decimal(self.0)
    }

    /// Probability implied by this price, vig included.
    pub fn implied_probability(&self) -> f64 {
        1.0 / self.to_decimal()
    }

    /// Parse an odds string: optional sign, digits, the literals
    /// "EVEN"/"EV"/"PK" (pick'em, +100), and an ignored trailing
    /// parenthetical annotation.
    pub fn parse(input: &str) -> Result<Self, OddsParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(OddsParseError::Empty);
        }

        let upper = trimmed.to_ascii_uppercase();
        let body = match upper.split_once('(') {
            Some((head, _)) => head.trim_end(),
            None => upper.as_str(),
        };
        if body.is_empty() {
            return Err(OddsParseError::Empty);
        }
        if body == "EVEN" || body == "EV" || body == "PK" {
            return Ok(AmericanOdds(100));
        }

        let mut chars = body.char_indices().peekable();
        let mut negative = false;
        if let Some(&(_, c)) = chars.peek() {
            if c == '+' || c == '-' {
                negative = c == '-';
                chars.next();
            }
        }

        while let Some(&(_, c)) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }

        // One contiguous digit run; a second run after whitespace is an
        // error, not a continuation ("1 50" is not 150).
        let mut magnitude: i64 = 0;
        let mut digits = 0usize;
        while let Some(&(_, c)) = chars.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            magnitude = magnitude * 10 + (c as u8 - b'0') as i64;
            digits += 1;
            chars.next();
            if magnitude > i32::MAX as i64 {
                return Err(OddsParseError::TrailingInput(body.to_string()));
            }
        }
        if digits == 0 {
            return match chars.peek() {
                Some(&(pos, c)) => Err(OddsParseError::InvalidChar {
                    found: c,
                    position: pos,
                }),
                None => Err(OddsParseError::Empty),
            };
        }
        for (pos, c) in chars {
            if !c.is_whitespace() {
                return Err(OddsParseError::InvalidChar {
                    found: c,
                    position: pos,
                });
            }
        }

        let value = if negative {
            -(magnitude as i32)
        } else {
            magnitude as i32
        };
        AmericanOdds::new(value)
    }
}

/// Convert an American odds value to decimal (stake multiplier on win).
pub fn american_to_decimal(american: i32) -> f64 {
    if american >= 0 {
        1.0 + american as f64 / 100.0
    } else {
        1.0 + 100.0 / american.abs() as f64
    }
}

/// Convert decimal odds back to the nearest American value.
pub fn decimal_to_american(decimal: f64) -> i32 {
    if decimal >= 2.0 {
        ((decimal - 1.0) * 100.0).round() as i32
    } else {
        (-100.0 / (decimal - 1.0)).round() as i32
    }
}

/// Probability implied by decimal odds, vig included.
pub fn implied_probability(decimal: f64) -> f64 {
    if decimal <= 1.0 {
        return 1.0;
    }
    1.0 / decimal
}
