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

use std::{fmt, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{ParticipantId, choice::Choice, error::EngineError, item::Item};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum MatchStatus {
    #[default]
    Pending,
    Open,
    Closed,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Vote {
    pub participant_id: ParticipantId,
    pub choice: Choice,
    pub cast_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Tally {
    pub a: usize,
    pub b: usize,
}

impl Tally {
    /// Higher tally wins, side A wins ties.
    #[must_use]
    pub fn winner(self) -> Choice {
        if self.b > self.a {
            Choice::B
        } else {
            Choice::A
        }
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.a, self.b)
    }
}

/// One head-to-head vote.
///
/// The tally is always recounted from `votes`, which holds the latest vote of
/// each participant, so a repeated or revised vote can never count twice.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Match {
    pub round: usize,
    pub slot: usize,
    pub item_a: Item,
    pub item_b: Item,
    pub tally: Tally,
    pub status: MatchStatus,
    pub votes: FxHashMap<ParticipantId, Vote>,
    pub winner_item_id: Option<String>,
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
}

impl Match {
    #[must_use]
    pub fn new(round: usize, slot: usize, item_a: Item, item_b: Item) -> Self {
        Self {
            round,
            slot,
            item_a,
            item_b,
            tally: Tally::default(),
            status: MatchStatus::Pending,
            votes: FxHashMap::default(),
            winner_item_id: None,
            opens_at: None,
            closes_at: None,
        }
    }

    #[must_use]
    pub fn item(&self, choice: Choice) -> &Item {
        match choice {
            Choice::A => &self.item_a,
            Choice::B => &self.item_b,
        }
    }

    pub fn voters(&self) -> impl Iterator<Item = &ParticipantId> {
        self.votes.keys()
    }

    /// # Errors
    ///
    /// If the match was already opened.
    pub fn open(
        &mut self,
        now: DateTime<Utc>,
        window: Option<Duration>,
    ) -> Result<(), EngineError> {
        if self.status != MatchStatus::Pending {
            return Err(EngineError::MatchClosed);
        }

        self.status = MatchStatus::Open;
        self.opens_at = Some(now);
        self.closes_at = window
            .and_then(|window| TimeDelta::from_std(window).ok())
            .and_then(|window| now.checked_add_signed(window));

        Ok(())
    }

    /// Records `choice` as the latest vote of `participant_id`.
    ///
    /// # Errors
    ///
    /// If the match is not open.
    pub fn submit_vote(
        &mut self,
        participant_id: &str,
        choice: Choice,
        now: DateTime<Utc>,
    ) -> Result<Tally, EngineError> {
        if self.status != MatchStatus::Open {
            return Err(EngineError::MatchClosed);
        }

        self.votes.insert(
            participant_id.to_string(),
            Vote {
                participant_id: participant_id.to_string(),
                choice,
                cast_at: now,
            },
        );
        self.recount();

        Ok(self.tally)
    }

    /// Closes the match and returns the winner. Closing a closed match
    /// returns the same winner again.
    ///
    /// # Errors
    ///
    /// If the match was never opened.
    pub fn close(&mut self) -> Result<Item, EngineError> {
        match self.status {
            MatchStatus::Pending => Err(EngineError::MatchClosed),
            MatchStatus::Open | MatchStatus::Closed => {
                self.status = MatchStatus::Closed;
                self.recount();

                let winner = self.item(self.tally.winner()).clone();
                self.winner_item_id = Some(winner.id.clone());

                Ok(winner)
            }
        }
    }

    fn recount(&mut self) {
        let mut tally = Tally::default();

        for vote in self.votes.values() {
            match vote.choice {
                Choice::A => tally.a += 1,
                Choice::B => tally.b += 1,
            }
        }

        self.tally = tally;
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round {} match {}: {} vs {} [{}] {}",
            self.round, self.slot, self.item_a.id, self.item_b.id, self.tally, self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_match() -> Match {
        let mut game = Match::new(0, 0, Item::new("a", "Apple"), Item::new("b", "Banana"));
        assert!(game.open(Utc::now(), None).is_ok());
        game
    }

    #[test]
    fn revised_votes_count_once() -> anyhow::Result<()> {
        let mut game = open_match();
        let now = Utc::now();

        game.submit_vote("p1", Choice::B, now)?;
        game.submit_vote("p1", Choice::B, now)?;
        game.submit_vote("p2", Choice::A, now)?;
        let tally = game.submit_vote("p1", Choice::A, now)?;

        assert_eq!(tally, Tally { a: 2, b: 0 });
        assert_eq!(tally.a + tally.b, game.voters().count());

        Ok(())
    }

    #[test]
    fn close_is_idempotent() -> anyhow::Result<()> {
        let mut game = open_match();
        game.submit_vote("p1", Choice::B, Utc::now())?;

        let first = game.close()?;
        let second = game.close()?;

        assert_eq!(first.id, "b");
        assert_eq!(first, second);
        assert_eq!(game.winner_item_id.as_deref(), Some("b"));

        Ok(())
    }

    #[test]
    fn ties_go_to_side_a() -> anyhow::Result<()> {
        let mut game = open_match();
        assert_eq!(game.close()?.id, "a");

        let mut game = open_match();
        game.submit_vote("p1", Choice::A, Utc::now())?;
        game.submit_vote("p2", Choice::B, Utc::now())?;
        assert_eq!(game.close()?.id, "a");

        Ok(())
    }

    #[test]
    fn no_votes_after_close() -> anyhow::Result<()> {
        let mut game = open_match();
        game.close()?;

        assert_eq!(
            game.submit_vote("p1", Choice::B, Utc::now()),
            Err(EngineError::MatchClosed)
        );
        assert_eq!(game.tally, Tally::default());

        Ok(())
    }

    #[test]
    fn pending_matches_refuse_votes_and_close() {
        let mut game = Match::new(1, 0, Item::new("a", "Apple"), Item::new("b", "Banana"));

        assert_eq!(
            game.submit_vote("p1", Choice::A, Utc::now()),
            Err(EngineError::MatchClosed)
        );
        assert_eq!(game.close(), Err(EngineError::MatchClosed));
    }

    #[test]
    fn a_window_sets_closes_at() {
        let mut game = Match::new(0, 0, Item::new("a", "Apple"), Item::new("b", "Banana"));
        let now = Utc::now();

        assert!(game.open(now, Some(Duration::from_secs(30))).is_ok());
        assert_eq!(game.closes_at, Some(now + TimeDelta::seconds(30)));
        assert!(game.open(now, None).is_err());
    }
}
