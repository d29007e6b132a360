use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Which side of a match a vote goes to.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Choice {
    #[default]
    A,
    B,
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Choice::A => write!(f, "a"),
            Choice::B => write!(f, "b"),
        }
    }
}

/// Normalizes what a voter typed, e.g. `"1"`, `" 2 "`, `"A"` or `"b"`.
impl FromStr for Choice {
    type Err = EngineError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let trimmed = string.trim().to_lowercase();

        match trimmed.as_str() {
            "1" | "a" => Ok(Self::A),
            "2" | "b" => Ok(Self::B),
            _ => Err(EngineError::InvalidChoice(string.to_string())),
        }
    }
}
