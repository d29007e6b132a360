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

//! The single authority over one tournament.
//!
//! A [`Session`] owns its [`Tournament`], the participants and the observers
//! and runs on a thread of its own. Every vote and transition for that
//! tournament is a [`Request`] on one channel, so they are applied one at a
//! time in arrival order while other tournaments run on their own threads.
//!
//! Once the tournament is finished or cancelled the session gives its join
//! code back to the directory, before the request that ended it is answered.
//! It keeps answering whoever still holds a [`SessionHandle`], so a repeated
//! `advance` is told the tournament is over, and stops when the last handle
//! is dropped.

use std::{
    str::FromStr,
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::Duration,
};

use chrono::Utc;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::{
    JoinCode, ParticipantId, TournamentId,
    choice::Choice,
    directory::SessionDirectory,
    error::EngineError,
    event::{Event, Observers},
    history::{HistoryRecord, SharedHistory},
    participant::{Participants, Profile},
    tournament::{Caller, Tournament},
};

pub type Reply = Sender<Result<(), EngineError>>;

#[derive(Debug)]
pub enum Request {
    Join {
        profile: Profile,
        reply: Reply,
    },
    Leave {
        user_id: ParticipantId,
        reply: Reply,
    },
    Vote {
        participant_id: ParticipantId,
        choice: Choice,
        reply: Reply,
    },
    Start {
        caller: Caller,
        reply: Reply,
    },
    Advance {
        caller: Caller,
        reply: Reply,
    },
    Cancel {
        caller: Caller,
        reply: Reply,
    },
    Expire { round: usize, slot: usize },
    Subscribe(Sender<Event>),
    Snapshot(Sender<SessionSnapshot>),
}

/// Everything needed to bring a session back after a restart.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub tournament: Tournament,
    pub participants: Participants,
}

pub struct Session {
    tournament: Tournament,
    participants: Participants,
    observers: Observers,
    history: SharedHistory,
    directory: SessionDirectory,
    /// Feeds expiry timers; dropped once the tournament is over.
    tx: Option<Sender<Request>>,
}

impl Session {
    /// Starts the session thread and returns the way to talk to it.
    ///
    /// # Errors
    ///
    /// If the thread could not be spawned.
    pub fn spawn(
        snapshot: SessionSnapshot,
        history: SharedHistory,
        directory: SessionDirectory,
    ) -> anyhow::Result<SessionHandle> {
        let (tx, rx) = mpsc::channel();
        let handle = SessionHandle {
            code: snapshot.tournament.join_code,
            tournament_id: snapshot.tournament.id,
            tx: tx.clone(),
        };

        let mut session = Session {
            tournament: snapshot.tournament,
            participants: snapshot.participants,
            observers: Observers::default(),
            history,
            directory,
            tx: Some(tx),
        };
        session.resume_timer();

        thread::Builder::new()
            .name(format!("session-{}", handle.code))
            .spawn(move || session.handle_messages(&rx))?;

        Ok(handle)
    }

    fn handle_messages(&mut self, rx: &Receiver<Request>) {
        for request in rx {
            self.handle(request);
        }

        debug!("{} session stopped", self.tournament.join_code);
    }

    fn handle(&mut self, request: Request) {
        let code = self.tournament.join_code;
        let now = Utc::now();

        match request {
            Request::Join { profile, reply } => {
                let event = Event::Joined {
                    user_id: profile.user_id.clone(),
                    display_name: profile.display_name.clone(),
                };

                let user_id = profile.user_id.clone();
                if self.participants.join(profile, now) {
                    info!("{code} {user_id} joined");
                } else {
                    info!("{code} {user_id} rejoined");
                }
                self.observers.broadcast(&event);
                let _ok = reply.send(Ok(()));
            }
            Request::Leave { user_id, reply } => {
                let result = if self.participants.leave(&user_id) {
                    Ok(())
                } else {
                    Err(EngineError::NotJoined(user_id))
                };
                let _ok = reply.send(result);
            }
            Request::Vote {
                participant_id,
                choice,
                reply,
            } => {
                let result = self.vote(&participant_id, choice);
                if let Err(error) = &result {
                    debug!("{code} {participant_id} vote {choice}: {error}");
                }
                let _ok = reply.send(result);
            }
            Request::Start { caller, reply } => {
                let result = self.tournament.start(&caller, now);
                let _ok = reply.send(self.publish(result));
            }
            Request::Advance { caller, reply } => {
                let result = self.tournament.advance(&caller, now);
                let _ok = reply.send(self.publish(result));
            }
            Request::Cancel { caller, reply } => {
                let result = self.tournament.cancel(&caller, now);
                let _ok = reply.send(self.publish(result));
            }
            Request::Expire { round, slot } => {
                let events = self.tournament.expire(round, slot, now);
                let _ok = self.publish(Ok(events));
            }
            Request::Subscribe(sender) => self.observers.subscribe(sender),
            Request::Snapshot(sender) => {
                let _ok = sender.send(self.snapshot());
            }
        }
    }

    /// A vote counts only for a joined participant and only in the open
    /// match.
    fn vote(&mut self, participant_id: &str, choice: Choice) -> Result<(), EngineError> {
        if !self.participants.contains(participant_id) {
            return Err(EngineError::NotJoined(participant_id.to_string()));
        }

        let event = self.tournament.vote(participant_id, choice, Utc::now())?;
        self.observers.broadcast(&event);

        Ok(())
    }

    fn publish(&mut self, result: Result<Vec<Event>, EngineError>) -> Result<(), EngineError> {
        let events = match result {
            Ok(events) => events,
            Err(error) => {
                error!("{} {error}", self.tournament.join_code);
                return Err(error);
            }
        };

        for event in &events {
            match event {
                Event::MatchOpened { round, slot, .. } => {
                    if let Some(window) = self.tournament.voting_window {
                        self.schedule_expiry(*round, *slot, window);
                    }
                }
                Event::Finished { .. } => self.archive(),
                _ => {}
            }

            self.observers.broadcast(event);
        }

        self.release_if_over();
        Ok(())
    }

    fn release_if_over(&mut self) {
        if self.tournament.status.is_terminal() && self.tx.take().is_some() {
            self.directory
                .release(self.tournament.join_code, self.tournament.id);
            info!(
                "{} session closed: {}",
                self.tournament.join_code, self.tournament.status
            );
        }
    }

    fn archive(&self) {
        let Some(record) = HistoryRecord::archive(&self.tournament, self.participants.len())
        else {
            error!(
                "{} archive: the tournament has no winner",
                self.tournament.join_code
            );
            return;
        };

        info!("{} archive: {record}", self.tournament.join_code);
        match self.history.lock() {
            Ok(mut history) => {
                if let Err(error) = history.append(record) {
                    error!("{} archive: {error}", self.tournament.join_code);
                }
            }
            Err(error) => error!("{} archive: {error}", self.tournament.join_code),
        }
    }

    fn schedule_expiry(&self, round: usize, slot: usize, after: Duration) {
        let Some(tx) = self.tx.clone() else {
            return;
        };

        thread::spawn(move || {
            thread::sleep(after);
            let _ok = tx.send(Request::Expire { round, slot });
        });
    }

    /// After a restart the open match keeps the deadline it was opened with.
    fn resume_timer(&self) {
        if let Some(game) = self.tournament.current_match()
            && let Some(closes_at) = game.closes_at
        {
            let remaining = (closes_at - Utc::now()).to_std().unwrap_or_default();
            self.schedule_expiry(game.round, game.slot, remaining);
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            tournament: self.tournament.clone(),
            participants: self.participants.clone(),
        }
    }
}

/// A cheap, cloneable way to reach a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub code: JoinCode,
    pub tournament_id: TournamentId,
    tx: Sender<Request>,
}

impl SessionHandle {
    fn call(&self, request: impl FnOnce(Reply) -> Request) -> Result<(), EngineError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(request(reply))
            .map_err(|_| EngineError::SessionGone)?;

        rx.recv().map_err(|_| EngineError::SessionGone)?
    }

    /// Joining twice updates the profile and keeps the votes.
    ///
    /// # Errors
    ///
    /// If the session is gone.
    pub fn join(&self, profile: Profile) -> Result<(), EngineError> {
        self.call(|reply| Request::Join { profile, reply })
    }

    /// # Errors
    ///
    /// If the user never joined or the session is gone.
    pub fn leave(&self, user_id: &str) -> Result<(), EngineError> {
        self.call(|reply| Request::Leave {
            user_id: user_id.to_string(),
            reply,
        })
    }

    /// Votes with what the participant typed, e.g. `"1"` or `"2"`.
    ///
    /// # Errors
    ///
    /// If the text is not a choice, the participant has not joined or no
    /// match is open.
    pub fn vote(&self, participant_id: &str, text: &str) -> Result<(), EngineError> {
        let choice = Choice::from_str(text)?;
        self.vote_choice(participant_id, choice)
    }

    /// # Errors
    ///
    /// If the participant has not joined or no match is open.
    pub fn vote_choice(&self, participant_id: &str, choice: Choice) -> Result<(), EngineError> {
        self.call(|reply| Request::Vote {
            participant_id: participant_id.to_string(),
            choice,
            reply,
        })
    }

    /// # Errors
    ///
    /// If the caller is not the host or the tournament already started.
    pub fn start(&self, caller: &Caller) -> Result<(), EngineError> {
        let caller = caller.clone();
        self.call(|reply| Request::Start { caller, reply })
    }

    /// # Errors
    ///
    /// If the caller is not the host or the tournament is not active.
    pub fn advance(&self, caller: &Caller) -> Result<(), EngineError> {
        let caller = caller.clone();
        self.call(|reply| Request::Advance { caller, reply })
    }

    /// # Errors
    ///
    /// If the caller is not the host or the tournament already ended.
    pub fn cancel(&self, caller: &Caller) -> Result<(), EngineError> {
        let caller = caller.clone();
        self.call(|reply| Request::Cancel { caller, reply })
    }

    /// # Errors
    ///
    /// If the session is gone.
    pub fn subscribe(&self, sender: Sender<Event>) -> Result<(), EngineError> {
        self.tx
            .send(Request::Subscribe(sender))
            .map_err(|_| EngineError::SessionGone)
    }

    /// # Errors
    ///
    /// If the session is gone.
    pub fn snapshot(&self) -> Result<SessionSnapshot, EngineError> {
        let (tx, rx) = mpsc::channel();
        self.tx
            .send(Request::Snapshot(tx))
            .map_err(|_| EngineError::SessionGone)?;

        rx.recv().map_err(|_| EngineError::SessionGone)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{bracket::BracketSize, history::MemoryHistoryStore, item::Item, status::Status};

    type History = Arc<Mutex<MemoryHistoryStore>>;

    fn tournament(window: Option<Duration>) -> anyhow::Result<Tournament> {
        let items: Vec<_> = (0..8).map(|i| Item::new(&i.to_string(), "x")).collect();
        let mut tournament = Tournament::create(
            3,
            "digits",
            &items,
            BracketSize::_8,
            "host",
            &mut StdRng::seed_from_u64(0),
        )?
        .with_voting_window(window);
        tournament.join_code = 123_456;

        Ok(tournament)
    }

    fn spawn(window: Option<Duration>) -> anyhow::Result<(SessionHandle, History)> {
        spawn_tournament(tournament(window)?)
    }

    fn spawn_tournament(tournament: Tournament) -> anyhow::Result<(SessionHandle, History)> {
        let history = Arc::new(Mutex::new(MemoryHistoryStore::default()));
        let handle = Session::spawn(
            SessionSnapshot {
                tournament,
                participants: Participants::default(),
            },
            history.clone(),
            SessionDirectory::default(),
        )?;

        Ok((handle, history))
    }

    #[test]
    fn votes_need_a_join() -> anyhow::Result<()> {
        let (session, _history) = spawn(None)?;
        session.start(&Caller::new("host"))?;

        assert_eq!(
            session.vote("p", "1"),
            Err(EngineError::NotJoined("p".to_string()))
        );
        assert_eq!(
            session.vote("p", "left"),
            Err(EngineError::InvalidChoice("left".to_string()))
        );

        session.join(Profile::new("p", "Pat"))?;
        session.vote("p", "1")?;

        let snapshot = session.snapshot()?;
        let tally = snapshot.tournament.current_match().map(|game| game.tally);
        assert_eq!(tally.map(|tally| (tally.a, tally.b)), Some((1, 0)));

        Ok(())
    }

    #[test]
    fn observers_see_tallies() -> anyhow::Result<()> {
        let (session, _history) = spawn(None)?;
        let (tx, rx) = mpsc::channel();
        session.subscribe(tx)?;
        session.join(Profile::new("p", "Pat"))?;
        session.start(&Caller::new("host"))?;
        session.vote("p", "2")?;

        let lines: Vec<_> = rx.try_iter().map(|event| event.to_string()).collect();
        assert_eq!(
            lines,
            vec!["= joined p", "= match_opened 0 0 0 1", "= tally 0 0 0 1"]
        );

        Ok(())
    }

    #[test]
    fn a_finished_session_archives_once() -> anyhow::Result<()> {
        let (session, history) = spawn(None)?;
        let host = Caller::new("host");
        session.start(&host)?;
        for _ in 0..7 {
            session.advance(&host)?;
        }

        // A second click on advance after the final.
        assert_eq!(
            session.advance(&host),
            Err(EngineError::InvalidTransition {
                operation: "advance",
                status: Status::Finished
            })
        );
        assert_eq!(
            session.cancel(&host),
            Err(EngineError::InvalidTransition {
                operation: "cancel",
                status: Status::Finished
            })
        );
        assert_eq!(
            session.vote_choice("p", Choice::A),
            Err(EngineError::NotJoined("p".to_string()))
        );

        let records = history.lock().map(|history| history.0.clone());
        assert_eq!(records.map(|records| records.len()).ok(), Some(1));
        let snapshot = session.snapshot()?;
        let winner = snapshot.tournament.winner().map(|item| item.id.as_str());
        assert_eq!(winner, Some("0"));

        Ok(())
    }

    #[test]
    fn the_window_advances_without_the_host() -> anyhow::Result<()> {
        let (session, _history) = spawn(Some(Duration::from_millis(40)))?;
        session.start(&Caller::new("host"))?;

        thread::sleep(Duration::from_millis(100));
        let snapshot = session.snapshot()?;

        assert_eq!(snapshot.tournament.status, Status::Active);
        assert!(snapshot.tournament.current_key() > (0, 0));
        assert!(
            snapshot
                .tournament
                .matches
                .iter()
                .any(|game| game.winner_item_id.is_some())
        );

        Ok(())
    }

    #[test]
    fn a_deadline_that_passed_while_down_closes_on_resume() -> anyhow::Result<()> {
        let mut tournament = tournament(Some(Duration::from_secs(60)))?;
        let opened = Utc::now() - chrono::TimeDelta::seconds(120);
        tournament.start(&Caller::new("host"), opened)?;
        assert!(
            tournament
                .current_match()
                .and_then(|game| game.closes_at)
                .is_some_and(|closes_at| closes_at < Utc::now())
        );

        let (session, _history) = spawn_tournament(tournament)?;

        let mut key = (0, 0);
        for _ in 0..100 {
            key = session.snapshot()?.tournament.current_key();
            if key != (0, 0) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(key, (0, 1));

        let snapshot = session.snapshot()?;
        let next = snapshot.tournament.current_match();
        let closes_at = next.and_then(|game| game.closes_at);
        assert!(closes_at.is_some_and(|closes_at| closes_at > Utc::now()));

        Ok(())
    }
}
