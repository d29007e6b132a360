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

use std::{fmt, str::FromStr};

use rand::{Rng, seq::index};
use serde::{Deserialize, Serialize};

use crate::{choice::Choice, error::ValidationError, item::Item};

pub const BRACKET_SIZES: [BracketSize; 5] = [
    BracketSize::_8,
    BracketSize::_16,
    BracketSize::_32,
    BracketSize::_64,
    BracketSize::_128,
];

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum BracketSize {
    _8,
    #[default]
    _16,
    _32,
    _64,
    _128,
}

impl BracketSize {
    /// `log2(size)`
    #[must_use]
    pub fn rounds(self) -> usize {
        usize::from(self).trailing_zeros() as usize
    }

    /// Every match the bracket will ever hold, `size - 1`.
    #[must_use]
    pub fn total_matches(self) -> usize {
        usize::from(self) - 1
    }

    #[must_use]
    pub fn matches_in_round(self, round: usize) -> usize {
        usize::from(self) >> (round + 1)
    }

    /// Where round `round` starts in the flat list of matches.
    #[must_use]
    pub fn round_offset(self, round: usize) -> usize {
        let size = usize::from(self);
        size - (size >> round)
    }

    /// The flat index of `(round, slot)`; this is the storage key of a match.
    #[must_use]
    pub fn match_index(self, round: usize, slot: usize) -> usize {
        self.round_offset(round) + slot
    }
}

impl fmt::Display for BracketSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", usize::from(*self))
    }
}

impl From<BracketSize> for usize {
    fn from(size: BracketSize) -> Self {
        match size {
            BracketSize::_8 => 8,
            BracketSize::_16 => 16,
            BracketSize::_32 => 32,
            BracketSize::_64 => 64,
            BracketSize::_128 => 128,
        }
    }
}

impl FromStr for BracketSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let size = s.parse::<usize>()?;
        Ok(BracketSize::try_from(size)?)
    }
}

impl TryFrom<usize> for BracketSize {
    type Error = ValidationError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            8 => Ok(BracketSize::_8),
            16 => Ok(BracketSize::_16),
            32 => Ok(BracketSize::_32),
            64 => Ok(BracketSize::_64),
            128 => Ok(BracketSize::_128),
            _ => Err(ValidationError::InvalidBracketSize(value)),
        }
    }
}

/// The frozen seed of a tournament.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bracket {
    pub size: BracketSize,
    pub seed: Vec<Item>,
}

impl Bracket {
    /// Round one pairs `seed[2k]` with `seed[2k + 1]`.
    #[must_use]
    pub fn first_round(&self) -> Vec<(Item, Item)> {
        self.seed
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    }
}

/// Seeds `items` into a bracket of `size`.
///
/// When there are more items than places, `size` of them are sampled without
/// replacement. Otherwise the catalog order is the seed order.
///
/// # Errors
///
/// If there are fewer items than places in the bracket.
pub fn build<R: Rng + ?Sized>(
    items: &[Item],
    size: BracketSize,
    rng: &mut R,
) -> Result<Bracket, ValidationError> {
    let needed = usize::from(size);

    if items.len() < needed {
        return Err(ValidationError::InsufficientItems {
            needed,
            available: items.len(),
        });
    }

    let seed = if items.len() == needed {
        items.to_vec()
    } else {
        index::sample(rng, items.len(), needed)
            .into_iter()
            .map(|i| items[i].clone())
            .collect()
    };

    Ok(Bracket { size, seed })
}

/// Where the winner of `slot` plays in the next round: winners of `2k` and
/// `2k + 1` meet in match `k`, the even slot taking side A.
#[must_use]
pub fn next_slot(slot: usize) -> (usize, Choice) {
    let side = if slot % 2 == 0 { Choice::A } else { Choice::B };
    (slot / 2, side)
}
