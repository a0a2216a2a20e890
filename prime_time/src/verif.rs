use rug::Integer;
use rug::integer::IsPrime;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::types::{METHOD, Request, Response};

/// Miller-Rabin rounds GMP runs after its Baillie-PSW pass.
const PRIMALITY_REPS: u32 = 30;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed request: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed request: invalid method {0:?}")]
    InvalidMethod(String),
    #[error("malformed request: missing number")]
    MissingNumber,
    #[error("malformed request: line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Turns one record (without its newline) into one newline-terminated
/// response record.
pub fn process_request(buf: &[u8]) -> Result<Vec<u8>, Error> {
    let parsed = parse_request(buf)?;
    let resp = parsed.process()?;
    let mut buf = serde_json::to_vec(&resp).map_err(Error::Encode)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Only JSON objects are requests, even though serde would happily fill a
/// struct from an array.
pub fn parse_request(buf: &[u8]) -> Result<Request, Error> {
    let object: Map<String, Value> = serde_json::from_slice(buf)?;
    Ok(serde_json::from_value(Value::Object(object))?)
}

impl Request {
    pub fn process(self) -> Result<Response, Error> {
        if self.method != METHOD {
            return Err(Error::InvalidMethod(self.method));
        }
        let number = self.number.ok_or(Error::MissingNumber)?;
        Ok(Response::new(is_prime(&number)))
    }
}

/// Non-integers, zero, one and negatives are never prime.
pub fn is_prime(number: &Number) -> bool {
    Decimal::parse(&number.to_string()).is_some_and(|decimal| decimal.is_prime())
}

/// A JSON number literal read exactly as `digits * 10^scale`, with leading
/// and trailing zeros stripped from `digits`. Zero has empty `digits`.
#[derive(Debug, PartialEq, Eq)]
struct Decimal {
    negative: bool,
    digits: String,
    scale: i64,
}

impl Decimal {
    fn parse(literal: &str) -> Option<Self> {
        let (negative, unsigned) = match literal.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, literal),
        };
        let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
            Some(at) => (&unsigned[..at], parse_exponent(&unsigned[at + 1..])?),
            None => (unsigned, 0),
        };
        let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        let all_digits = whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit());
        if whole.is_empty() || !all_digits {
            return None;
        }

        let digits = format!("{whole}{fraction}");
        let significant = digits.trim_start_matches('0');
        let trimmed = significant.trim_end_matches('0');
        let scale = exponent
            .saturating_sub(fraction.len() as i64)
            .saturating_add((significant.len() - trimmed.len()) as i64);
        Some(Self {
            negative,
            digits: trimmed.to_string(),
            scale,
        })
    }

    fn is_integral(&self) -> bool {
        self.digits.is_empty() || self.scale >= 0
    }

    fn is_prime(&self) -> bool {
        if self.negative || self.digits.is_empty() || !self.is_integral() {
            return false;
        }
        // A positive scale makes this a non-zero multiple of ten.
        if self.scale > 0 {
            return false;
        }
        match self.digits.parse::<Integer>() {
            Ok(n) => !matches!(n.is_probably_prime(PRIMALITY_REPS), IsPrime::No),
            Err(_) => false,
        }
    }
}

/// Exponents too large for an i64 saturate; only their sign matters then.
fn parse_exponent(text: &str) -> Option<i64> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let exponent = match digits.parse::<i64>() {
        Ok(value) if negative => -value,
        Ok(value) => value,
        Err(_) if negative => i64::MIN,
        Err(_) => i64::MAX,
    };
    Some(exponent)
}
