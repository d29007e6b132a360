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

use chrono::{DateTime, Utc};
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    JoinCode, ParticipantId, TournamentId,
    bracket::{self, BracketSize},
    choice::Choice,
    error::EngineError,
    event::Event,
    item::Item,
    matchup::{Match, MatchStatus},
    status::Status,
};

/// Who is asking for a privileged transition.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Caller {
    pub user_id: ParticipantId,
    pub admin: bool,
}

impl Caller {
    #[must_use]
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            admin: false,
        }
    }
}

/// The round-by-round state of one bracket.
///
/// `matches` grows a round at a time: a round is created when the previous
/// one has completely closed, so its length is `bracket_size - 1` once the
/// final exists. Every operation checks before it mutates, a rejected call
/// leaves the tournament untouched.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Tournament {
    pub id: TournamentId,
    #[serde(default)]
    pub join_code: JoinCode,
    pub dataset_name: String,
    pub bracket_size: BracketSize,
    pub rounds: usize,
    pub current_round: usize,
    pub current_match_index: usize,
    pub status: Status,
    pub seed: Vec<Item>,
    pub matches: Vec<Match>,
    pub host_id: ParticipantId,
    #[serde(default)]
    pub voting_window: Option<Duration>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Tournament {
    /// Freezes a seed out of `items`. No match is opened yet.
    ///
    /// # Errors
    ///
    /// If there are not enough items for the bracket.
    pub fn create<R: Rng + ?Sized>(
        id: TournamentId,
        dataset_name: &str,
        items: &[Item],
        bracket_size: BracketSize,
        host_id: &str,
        rng: &mut R,
    ) -> Result<Self, EngineError> {
        let bracket = bracket::build(items, bracket_size, rng)?;

        let matches = bracket
            .first_round()
            .into_iter()
            .enumerate()
            .map(|(slot, (item_a, item_b))| Match::new(0, slot, item_a, item_b))
            .collect();

        Ok(Self {
            id,
            join_code: 0,
            dataset_name: dataset_name.to_string(),
            bracket_size,
            rounds: bracket_size.rounds(),
            current_round: 0,
            current_match_index: 0,
            status: Status::Created,
            seed: bracket.seed,
            matches,
            host_id: host_id.to_string(),
            voting_window: None,
            created_at: Utc::now(),
            finished_at: None,
        })
    }

    #[must_use]
    pub fn with_voting_window(mut self, voting_window: Option<Duration>) -> Self {
        self.voting_window = voting_window;
        self
    }

    #[must_use]
    pub fn current_key(&self) -> (usize, usize) {
        (self.current_round, self.current_match_index)
    }

    /// The open match, if the tournament is active.
    #[must_use]
    pub fn current_match(&self) -> Option<&Match> {
        if self.status == Status::Active {
            self.get_match(self.current_round, self.current_match_index)
        } else {
            None
        }
    }

    #[must_use]
    pub fn get_match(&self, round: usize, slot: usize) -> Option<&Match> {
        self.matches
            .get(self.bracket_size.match_index(round, slot))
            .filter(|game| game.round == round && game.slot == slot)
    }

    fn current_match_mut(&mut self) -> Option<&mut Match> {
        let index = self
            .bracket_size
            .match_index(self.current_round, self.current_match_index);
        self.matches.get_mut(index)
    }

    /// The winner of the final, once finished.
    #[must_use]
    pub fn winner(&self) -> Option<&Item> {
        if self.status != Status::Finished {
            return None;
        }

        let last = self.matches.last()?;
        let winner = last.winner_item_id.as_ref()?;
        [&last.item_a, &last.item_b]
            .into_iter()
            .find(|item| &item.id == winner)
    }

    fn authorize(&self, caller: &Caller) -> Result<(), EngineError> {
        if caller.admin || caller.user_id == self.host_id {
            Ok(())
        } else {
            Err(EngineError::Forbidden(caller.user_id.clone()))
        }
    }

    fn require(&self, operation: &'static str, status: Status) -> Result<(), EngineError> {
        if self.status == status {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                operation,
                status: self.status,
            })
        }
    }

    /// CREATED -> ACTIVE, opening the first match.
    ///
    /// # Errors
    ///
    /// If the caller is not the host or the tournament already started.
    pub fn start(
        &mut self,
        caller: &Caller,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, EngineError> {
        self.authorize(caller)?;
        self.require("start", Status::Created)?;

        info!("{} {} start", self.join_code, caller.user_id);
        let opened = self.open_current(now)?;
        self.status = Status::Active;

        Ok(vec![opened])
    }

    /// Closes the open match and opens the next one, or finishes the
    /// tournament after the final.
    ///
    /// # Errors
    ///
    /// If the caller is not the host or the tournament is not active.
    pub fn advance(
        &mut self,
        caller: &Caller,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, EngineError> {
        self.authorize(caller)?;
        self.require("advance", Status::Active)?;

        info!(
            "{} {} advance {} {}",
            self.join_code, caller.user_id, self.current_round, self.current_match_index
        );
        self.close_current(now)
    }

    /// The voting window of `(round, slot)` ran out. Ignored unless that match
    /// is still the open one.
    pub fn expire(&mut self, round: usize, slot: usize, now: DateTime<Utc>) -> Vec<Event> {
        if self.status != Status::Active || self.current_key() != (round, slot) {
            return Vec::new();
        }

        info!("{} expire {round} {slot}", self.join_code);
        self.close_current(now).unwrap_or_default()
    }

    /// Any state but a terminal one -> CANCELLED.
    ///
    /// # Errors
    ///
    /// If the caller is not the host or the tournament already ended.
    pub fn cancel(
        &mut self,
        caller: &Caller,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, EngineError> {
        self.authorize(caller)?;
        if self.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                operation: "cancel",
                status: self.status,
            });
        }

        info!("{} {} cancel", self.join_code, caller.user_id);
        self.status = Status::Cancelled;
        self.finished_at = Some(now);

        Ok(vec![Event::Cancelled])
    }

    /// Records `choice` for `participant_id` in the open match.
    ///
    /// # Errors
    ///
    /// If no match is open.
    pub fn vote(
        &mut self,
        participant_id: &str,
        choice: Choice,
        now: DateTime<Utc>,
    ) -> Result<Event, EngineError> {
        if self.status != Status::Active {
            return Err(EngineError::MatchClosed);
        }

        let game = self.current_match_mut().ok_or(EngineError::MatchClosed)?;
        let tally = game.submit_vote(participant_id, choice, now)?;

        Ok(Event::Tally {
            round: game.round,
            slot: game.slot,
            tally,
        })
    }

    fn open_current(&mut self, now: DateTime<Utc>) -> Result<Event, EngineError> {
        let window = self.voting_window;
        let game = self.current_match_mut().ok_or(EngineError::MatchClosed)?;
        game.open(now, window)?;

        Ok(Event::MatchOpened {
            round: game.round,
            slot: game.slot,
            item_a: game.item_a.clone(),
            item_b: game.item_b.clone(),
            closes_at: game.closes_at,
        })
    }

    fn close_current(&mut self, now: DateTime<Utc>) -> Result<Vec<Event>, EngineError> {
        let game = self.current_match_mut().ok_or(EngineError::MatchClosed)?;
        if game.status != MatchStatus::Open {
            return Err(EngineError::MatchClosed);
        }

        let winner = game.close()?;
        let mut events = vec![Event::MatchClosed {
            round: game.round,
            slot: game.slot,
            winner: winner.clone(),
            tally: game.tally,
        }];
        info!(
            "{} closed {} {} winner {winner}",
            self.join_code, self.current_round, self.current_match_index
        );

        let last_round = self.rounds - 1;
        if self.current_round == last_round {
            self.status = Status::Finished;
            self.finished_at = Some(now);
            info!("{} finished winner {winner}", self.join_code);
            events.push(Event::Finished { winner });

            return Ok(events);
        }

        if self.current_match_index + 1 < self.bracket_size.matches_in_round(self.current_round) {
            self.current_match_index += 1;
        } else {
            self.next_round();
        }

        events.push(self.open_current(now)?);
        Ok(events)
    }

    /// Pairs the winners of the closed round positionally.
    fn next_round(&mut self) {
        let round = self.current_round;
        let offset = self.bracket_size.round_offset(round);
        let count = self.bracket_size.matches_in_round(round);

        let mut pairs: Vec<(Option<Item>, Option<Item>)> = vec![(None, None); count / 2];
        for game in self.matches.iter().skip(offset).take(count) {
            let winner = game
                .winner_item_id
                .as_ref()
                .and_then(|id| {
                    [&game.item_a, &game.item_b]
                        .into_iter()
                        .find(|item| &item.id == id)
                })
                .cloned();

            let (slot, side) = bracket::next_slot(game.slot);
            if let Some(pair) = pairs.get_mut(slot) {
                match side {
                    Choice::A => pair.0 = winner,
                    Choice::B => pair.1 = winner,
                }
            }
        }

        for (slot, pair) in pairs.into_iter().enumerate() {
            if let (Some(item_a), Some(item_b)) = pair {
                let game = Match::new(round + 1, slot, item_a, item_b);
                self.matches.push(game);
            }
        }

        self.current_round += 1;
        self.current_match_index = 0;
    }
}

impl fmt::Display for Tournament {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} round {}/{} match {}",
            self.join_code,
            self.dataset_name,
            self.bracket_size,
            self.status,
            self.current_round,
            self.rounds,
            self.current_match_index
        )
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn letters() -> Vec<Item> {
        ["A", "B", "C", "D", "E", "F", "G", "H"]
            .iter()
            .map(|letter| Item::new(letter, letter))
            .collect()
    }

    fn tournament(size: BracketSize, items: &[Item]) -> anyhow::Result<Tournament> {
        let mut rng = StdRng::seed_from_u64(0);
        let tournament = Tournament::create(1, "letters", items, size, "host", &mut rng)?;
        Ok(tournament)
    }

    fn votes(tournament: &mut Tournament, a: usize, b: usize) -> anyhow::Result<()> {
        let now = Utc::now();
        for i in 0..a {
            tournament.vote(&format!("a{i}"), Choice::A, now)?;
        }
        for i in 0..b {
            tournament.vote(&format!("b{i}"), Choice::B, now)?;
        }
        Ok(())
    }

    #[test]
    fn eight_item_scenario() -> anyhow::Result<()> {
        let host = Caller::new("host");
        let mut tournament = tournament(BracketSize::_8, &letters())?;
        tournament.start(&host, Utc::now())?;

        for (a, b) in [(3, 1), (0, 0), (2, 5), (4, 4)] {
            votes(&mut tournament, a, b)?;
            tournament.advance(&host, Utc::now())?;
        }

        let round_1: Vec<_> = tournament
            .matches
            .iter()
            .filter(|game| game.round == 1)
            .map(|game| (game.item_a.id.as_str(), game.item_b.id.as_str()))
            .collect();
        assert_eq!(round_1, vec![("A", "C"), ("F", "G")]);

        votes(&mut tournament, 1, 0)?;
        tournament.advance(&host, Utc::now())?;
        votes(&mut tournament, 1, 0)?;
        tournament.advance(&host, Utc::now())?;

        let last = tournament
            .current_match()
            .map(|game| (game.item_a.id.clone(), game.item_b.id.clone()));
        assert_eq!(last, Some(("A".to_string(), "F".to_string())));

        votes(&mut tournament, 2, 1)?;
        let events = tournament.advance(&host, Utc::now())?;

        assert_eq!(tournament.status, Status::Finished);
        assert_eq!(tournament.matches.len(), 7);
        assert_eq!(tournament.winner().map(|item| item.id.as_str()), Some("A"));
        assert!(matches!(events.last(), Some(Event::Finished { winner }) if winner.id == "A"));

        Ok(())
    }

    #[test]
    fn progress_is_strictly_increasing() -> anyhow::Result<()> {
        let host = Caller::new("host");
        let items: Vec<_> = (0..32).map(|i| Item::new(&i.to_string(), "x")).collect();
        let mut tournament = tournament(BracketSize::_32, &items)?;
        tournament.start(&host, Utc::now())?;

        let mut seen = vec![tournament.current_key()];
        while tournament.status == Status::Active {
            tournament.advance(&host, Utc::now())?;
            if tournament.status == Status::Active {
                seen.push(tournament.current_key());
            }
        }

        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(seen.len(), 31);
        assert_eq!(seen.last(), Some(&(4, 0)));
        assert_eq!(tournament.matches.len(), 31);
        assert!(
            tournament
                .matches
                .iter()
                .all(|game| game.status == MatchStatus::Closed)
        );

        Ok(())
    }

    #[test]
    fn invalid_transitions_change_nothing() -> anyhow::Result<()> {
        let host = Caller::new("host");
        let mut tournament = tournament(BracketSize::_8, &letters())?;

        let before = tournament.clone();
        assert_eq!(
            tournament.advance(&host, Utc::now()),
            Err(EngineError::InvalidTransition {
                operation: "advance",
                status: Status::Created
            })
        );
        assert_eq!(tournament, before);

        tournament.start(&host, Utc::now())?;
        let before = tournament.clone();
        assert!(tournament.start(&host, Utc::now()).is_err());
        assert_eq!(tournament, before);

        Ok(())
    }

    #[test]
    fn only_the_host_or_an_admin() -> anyhow::Result<()> {
        let mut tournament = tournament(BracketSize::_8, &letters())?;

        assert_eq!(
            tournament.start(&Caller::new("guest"), Utc::now()),
            Err(EngineError::Forbidden("guest".to_string()))
        );

        let admin = Caller {
            user_id: "root".to_string(),
            admin: true,
        };
        tournament.start(&admin, Utc::now())?;
        assert_eq!(tournament.status, Status::Active);

        Ok(())
    }

    #[test]
    fn cancel_is_terminal() -> anyhow::Result<()> {
        let host = Caller::new("host");
        let mut tournament = tournament(BracketSize::_8, &letters())?;
        tournament.start(&host, Utc::now())?;

        assert_eq!(
            tournament.cancel(&host, Utc::now())?,
            vec![Event::Cancelled]
        );
        assert_eq!(tournament.status, Status::Cancelled);
        assert!(tournament.cancel(&host, Utc::now()).is_err());
        assert!(tournament.advance(&host, Utc::now()).is_err());
        assert_eq!(
            tournament.vote("p", Choice::A, Utc::now()),
            Err(EngineError::MatchClosed)
        );
        assert_eq!(tournament.winner(), None);

        Ok(())
    }

    #[test]
    fn stale_expiry_is_ignored() -> anyhow::Result<()> {
        let host = Caller::new("host");
        let mut tournament = tournament(BracketSize::_8, &letters())?;
        tournament.start(&host, Utc::now())?;
        tournament.advance(&host, Utc::now())?;

        assert!(tournament.expire(0, 0, Utc::now()).is_empty());
        assert_eq!(tournament.current_key(), (0, 1));

        let events = tournament.expire(0, 1, Utc::now());
        assert_eq!(events.len(), 2);
        assert_eq!(tournament.current_key(), (0, 2));

        Ok(())
    }
}
