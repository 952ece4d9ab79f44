use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Delivery Verification Code
// ============================================================================
//
// Six decimal digits, 100000-999999, drawn once when the order is placed.
// Single use: the order aggregate records the first successful match.
//
// ============================================================================

pub const CODE_MIN: u32 = 100_000;
pub const CODE_MAX: u32 = 999_999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationCode(String);

impl VerificationCode {
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(CODE_MIN..=CODE_MAX).to_string())
    }

    /// Accepts only a six-digit code in range
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.len() != 6 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match trimmed.parse::<u32>() {
            Ok(n) if (CODE_MIN..=CODE_MAX).contains(&n) => Some(Self(trimmed.to_string())),
            _ => None,
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate.trim()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VerificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..500 {
            let code = VerificationCode::generate();
            assert_eq!(code.as_str().len(), 6);
            assert!(VerificationCode::parse(code.as_str()).is_some());
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(VerificationCode::parse("482913").is_some());
        assert!(VerificationCode::parse(" 482913 ").is_some());
        assert!(VerificationCode::parse("048291").is_none());
        assert!(VerificationCode::parse("48291").is_none());
        assert!(VerificationCode::parse("48291a").is_none());
        assert!(VerificationCode::parse("4829130").is_none());
    }

    #[test]
    fn test_matches_exact_code_only() {
        let code = VerificationCode::parse("482913").unwrap();
        assert!(code.matches("482913"));
        assert!(!code.matches("482914"));
        assert!(!code.matches(""));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let code = VerificationCode::parse("482913").unwrap();
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"482913\"");
    }
}
