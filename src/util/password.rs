// SPDX-License-Identifier: MPL-2.0

use crate::config::MIN_PASSWORD_LEN;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static LOWER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z]").unwrap());
static UPPER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Z]").unwrap());
static DIGIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").unwrap());
static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z\d]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrengthLabel {
    Weak,
    Fair,
    Good,
    Strong,
}

impl fmt::Display for StrengthLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrengthLabel::Weak => "Weak",
            StrengthLabel::Fair => "Fair",
            StrengthLabel::Good => "Good",
            StrengthLabel::Strong => "Strong",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordStrength {
    /// 0..=4, one point per satisfied criterion
    pub score: u8,
    /// `None` only for an empty password
    pub label: Option<StrengthLabel>,
}

impl PasswordStrength {
    /// Fill fraction for a strength meter.
    pub fn ratio(&self) -> f64 {
        f64::from(self.score) / 4.0
    }
}

/// Score a password on length, mixed case, digits and symbols.
pub fn password_strength(password: &str) -> PasswordStrength {
    if password.is_empty() {
        return PasswordStrength {
            score: 0,
            label: None,
        };
    }

    let criteria = [
        password.chars().count() >= MIN_PASSWORD_LEN,
        LOWER_RE.is_match(password) && UPPER_RE.is_match(password),
        DIGIT_RE.is_match(password),
        SYMBOL_RE.is_match(password),
    ];
    let score = criteria.iter().filter(|met| **met).count() as u8;

    let label = match score {
        0 | 1 => StrengthLabel::Weak,
        2 => StrengthLabel::Fair,
        3 => StrengthLabel::Good,
        _ => StrengthLabel::Strong,
    };

    PasswordStrength {
        score,
        label: Some(label),
    }
}
