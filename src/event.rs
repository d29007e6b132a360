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

use std::{fmt, sync::mpsc::Sender};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ParticipantId, item::Item, matchup::Tally};

/// What observers of a session are told.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Event {
    Joined {
        user_id: ParticipantId,
        display_name: String,
    },
    MatchOpened {
        round: usize,
        slot: usize,
        item_a: Item,
        item_b: Item,
        closes_at: Option<DateTime<Utc>>,
    },
    Tally {
        round: usize,
        slot: usize,
        tally: Tally,
    },
    MatchClosed {
        round: usize,
        slot: usize,
        winner: Item,
        tally: Tally,
    },
    Finished {
        winner: Item,
    },
    Cancelled,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joined { user_id, .. } => write!(f, "= joined {user_id}"),
            Self::MatchOpened {
                round,
                slot,
                item_a,
                item_b,
                closes_at,
            } => {
                let (a, b) = (&item_a.id, &item_b.id);
                write!(f, "= match_opened {round} {slot} {a} {b}")?;
                if let Some(closes_at) = closes_at {
                    write!(f, " {}", closes_at.timestamp())?;
                }
                Ok(())
            }
            Self::Tally { round, slot, tally } => write!(f, "= tally {round} {slot} {tally}"),
            Self::MatchClosed {
                round,
                slot,
                winner,
                ..
            } => write!(f, "= match_closed {round} {slot} {}", winner.id),
            Self::Finished { winner } => write!(f, "= finished {}", winner.id),
            Self::Cancelled => write!(f, "= cancelled"),
        }
    }
}

/// The push channel of a session.
#[derive(Debug, Default)]
pub struct Observers(Vec<Sender<Event>>);

impl Observers {
    pub fn subscribe(&mut self, sender: Sender<Event>) {
        self.0.push(sender);
    }

    /// Observers that hung up are dropped.
    pub fn broadcast(&mut self, event: &Event) {
        self.0.retain(|sender| sender.send(event.clone()).is_ok());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
