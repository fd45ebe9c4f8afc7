//! Password rules shown on the sign-up and account screens.

use std::fmt::{Display, Formatter};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PasswordRequirements {
    pub length: bool,
    pub upper: bool,
    pub lower: bool,
    pub digit: bool,
    pub special: bool,
    pub no_spaces: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    Weak,
    Fair,
    Good,
    Strong,
}

impl Strength {
    pub fn label(&self) -> &'static str {
        match self {
            Strength::Weak => "Weak",
            Strength::Fair => "Fair",
            Strength::Good => "Good",
            Strength::Strong => "Strong",
        }
    }
}

impl Display for Strength {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl PasswordRequirements {
    pub fn evaluate(password: &str) -> Self {
        Self {
            length: password.chars().count() >= MIN_PASSWORD_LEN,
            upper: password.chars().any(|c| c.is_uppercase()),
            lower: password.chars().any(|c| c.is_lowercase()),
            digit: password.chars().any(|c| c.is_ascii_digit()),
            special: password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()),
            no_spaces: !password.is_empty() && !password.chars().any(char::is_whitespace),
        }
    }

    /// Points for length, upper, lower, digit and special.
    pub fn score(&self) -> u8 {
        [self.length, self.upper, self.lower, self.digit, self.special].iter().filter(|b| **b).count() as u8
    }

    pub fn strength(&self) -> Strength {
        match self.score() {
            0..=2 => Strength::Weak,
            3 => Strength::Fair,
            4 => Strength::Good,
            _ => Strength::Strong,
        }
    }

    pub fn all_met(&self) -> bool {
        self.length && self.upper && self.lower && self.digit && self.special && self.no_spaces
    }

    /// Human labels of the rules not yet satisfied, in display order.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !self.length {
            out.push("At least 8 characters");
        }
        if !self.upper {
            out.push("One uppercase letter");
        }
        if !self.lower {
            out.push("One lowercase letter");
        }
        if !self.digit {
            out.push("One number");
        }
        if !self.special {
            out.push("One special character");
        }
        if !self.no_spaces {
            out.push("No spaces");
        }
        out
    }
}
