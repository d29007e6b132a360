// This file is part of bracket-poll.
//
// bracket-poll is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// bracket-poll is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use thiserror::Error;

use crate::{JoinCode, status::Status};

/// Failures returned to the caller of an engine operation.
///
/// None of these mutate state: the operation that raised one is rejected as a
/// whole and may be retried.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),
    #[error("invalid_transition: cannot {operation} a tournament that is {status}")]
    InvalidTransition {
        operation: &'static str,
        status: Status,
    },
    #[error("match_closed: the match is not open for voting")]
    MatchClosed,
    #[error("invalid_choice: {0:?} is not a choice")]
    InvalidChoice(String),
    #[error("not_joined: {0} has not joined the session")]
    NotJoined(String),
    #[error("forbidden: {0} is not the host")]
    Forbidden(String),
    #[error("not_found: no session has the code {0}")]
    NotFound(JoinCode),
    #[error("session_gone: the session is no longer running")]
    SessionGone,
    #[error("codes_exhausted: could not generate a free join code")]
    CodesExhausted,
}

impl EngineError {
    /// The single word used on the wire after `?`.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::MatchClosed => "match_closed",
            Self::InvalidChoice(_) => "invalid_choice",
            Self::NotJoined(_) => "not_joined",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::SessionGone => "session_gone",
            Self::CodesExhausted => "codes_exhausted",
        }
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ValidationError {
    #[error("the bracket size {0} is not one of 8, 16, 32, 64 or 128")]
    InvalidBracketSize(usize),
    #[error("a bracket of {needed} needs at least {needed} items, got {available}")]
    InsufficientItems { needed: usize, available: usize },
}
