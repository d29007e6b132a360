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

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{error, info};
use rand::Rng;

use crate::{
    JoinCode, TournamentId,
    bracket::BracketSize,
    config::Config,
    error::EngineError,
    history::{self, MemoryHistoryStore, SharedHistory},
    item::{Catalog, Item},
    participant::{Participants, Profile},
    session::{Session, SessionHandle, SessionSnapshot},
    tournament::{Caller, Tournament},
};

#[derive(Debug, Default)]
struct Sessions {
    live: HashMap<JoinCode, SessionHandle>,
    next_id: TournamentId,
}

/// Maps join codes to live sessions. Only the directory hands out and takes
/// back codes.
#[derive(Clone)]
pub struct SessionDirectory {
    sessions: Arc<Mutex<Sessions>>,
    config: Arc<Config>,
    history: SharedHistory,
}

impl Default for SessionDirectory {
    fn default() -> Self {
        Self::new(
            Config::default(),
            Arc::new(Mutex::new(MemoryHistoryStore::default())),
        )
    }
}

impl fmt::Debug for SessionDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes = self.live_codes();
        codes.sort_unstable();
        write!(f, "SessionDirectory {codes:?}")
    }
}

impl SessionDirectory {
    #[must_use]
    pub fn new(config: Config, history: SharedHistory) -> Self {
        let next_id = history::list(&history, usize::MAX)
            .iter()
            .map(|record| record.tournament_id + 1)
            .max()
            .unwrap_or(1);

        Self {
            sessions: Arc::new(Mutex::new(Sessions {
                live: HashMap::new(),
                next_id,
            })),
            config: Arc::new(config),
            history,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    /// The caller as the engine sees it, admin or not.
    #[must_use]
    pub fn caller(&self, user_id: &str) -> Caller {
        Caller {
            user_id: user_id.to_string(),
            admin: self.config.admins.contains(user_id),
        }
    }

    /// # Errors
    ///
    /// If no live session has `code`.
    pub fn join(&self, code: JoinCode) -> Result<SessionHandle, EngineError> {
        self.lock()
            .live
            .get(&code)
            .cloned()
            .ok_or(EngineError::NotFound(code))
    }

    /// Looks up `code` and adds the participant to it.
    ///
    /// # Errors
    ///
    /// If no live session has `code`.
    pub fn add_participant(
        &self,
        code: JoinCode,
        profile: Profile,
    ) -> Result<SessionHandle, EngineError> {
        let session = self.join(code)?;
        session.join(profile)?;
        Ok(session)
    }

    /// Seeds a tournament from a catalog dataset and registers it.
    ///
    /// # Errors
    ///
    /// If the dataset cannot be read or the tournament cannot be built.
    pub fn create_from_catalog(
        &self,
        catalog: &dyn Catalog,
        dataset: &str,
        bracket_size: BracketSize,
        host_id: &str,
    ) -> anyhow::Result<SessionHandle> {
        let items = catalog.get_items(dataset)?;
        Ok(self.create(&items, dataset, bracket_size, host_id)?)
    }

    /// Builds a tournament out of `items` and registers it under a new code.
    ///
    /// # Errors
    ///
    /// If the tournament cannot be built or no code is free.
    pub fn create(
        &self,
        items: &[Item],
        dataset: &str,
        bracket_size: BracketSize,
        host_id: &str,
    ) -> Result<SessionHandle, EngineError> {
        let id = {
            let mut sessions = self.lock();
            let id = sessions.next_id;
            sessions.next_id += 1;
            id
        };

        let tournament =
            Tournament::create(id, dataset, items, bracket_size, host_id, &mut rand::rng())?
                .with_voting_window(self.config.voting_window());

        self.register(SessionSnapshot {
            tournament,
            participants: Participants::default(),
        })
    }

    /// Gives the tournament a code unique among the live sessions and starts
    /// its session. A code already set on the tournament is kept when free.
    ///
    /// # Errors
    ///
    /// If no code is free or the session could not start.
    pub fn register(&self, mut snapshot: SessionSnapshot) -> Result<SessionHandle, EngineError> {
        let mut sessions = self.lock();
        let (low, high) = self.config.code_range();

        let wanted = snapshot.tournament.join_code;
        let code = if (low..high).contains(&wanted) && !sessions.live.contains_key(&wanted) {
            wanted
        } else {
            let mut rng = rand::rng();
            (0..self.config.max_code_attempts)
                .map(|_| rng.random_range(low..high))
                .find(|code| !sessions.live.contains_key(code))
                .ok_or(EngineError::CodesExhausted)?
        };

        snapshot.tournament.join_code = code;
        sessions.next_id = sessions.next_id.max(snapshot.tournament.id + 1);

        let tournament = &snapshot.tournament;
        info!(
            "{code} {} register {} {} {}",
            tournament.host_id, tournament.id, tournament.dataset_name, tournament.bracket_size
        );

        let handle =
            Session::spawn(snapshot, self.history.clone(), self.clone()).map_err(|error| {
                error!("{code} spawn: {error}");
                EngineError::SessionGone
            })?;
        sessions.live.insert(code, handle.clone());

        Ok(handle)
    }

    /// Frees `code`, but only while it still belongs to `tournament_id`.
    pub fn release(&self, code: JoinCode, tournament_id: TournamentId) {
        let mut sessions = self.lock();

        if sessions
            .live
            .get(&code)
            .is_some_and(|handle| handle.tournament_id == tournament_id)
        {
            sessions.live.remove(&code);
            info!("{code} released");
        }
    }

    #[must_use]
    pub fn live_codes(&self) -> Vec<JoinCode> {
        self.lock().live.keys().copied().collect()
    }

    /// Snapshots of every live session, for saving on shutdown.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<SessionSnapshot> {
        let handles: Vec<_> = self.lock().live.values().cloned().collect();

        handles
            .iter()
            .filter_map(|handle| match handle.snapshot() {
                Ok(snapshot) => Some(snapshot),
                Err(error) => {
                    error!("{} snapshot: {error}", handle.code);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{choice::Choice, item::RonCatalog, status::Status};

    fn items() -> Vec<Item> {
        (0..8).map(|i| Item::new(&i.to_string(), "x")).collect()
    }

    fn small_codes() -> SessionDirectory {
        SessionDirectory::new(
            Config {
                code_digits: 1,
                max_code_attempts: 500,
                ..Config::default()
            },
            Arc::new(Mutex::new(MemoryHistoryStore::default())),
        )
    }

    #[test]
    fn codes_are_unique_until_exhausted() -> anyhow::Result<()> {
        let directory = small_codes();

        for _ in 1..10 {
            directory.create(&items(), "digits", BracketSize::_8, "host")?;
        }

        let mut codes = directory.live_codes();
        codes.sort_unstable();
        assert_eq!(codes, (1..10).collect::<Vec<_>>());

        assert_eq!(
            directory
                .create(&items(), "digits", BracketSize::_8, "host")
                .map(|handle| handle.code),
            Err(EngineError::CodesExhausted)
        );

        Ok(())
    }

    #[test]
    fn cancelled_codes_are_released() -> anyhow::Result<()> {
        let directory = small_codes();
        let session = directory.create(&items(), "digits", BracketSize::_8, "host")?;
        let code = session.code;

        assert_eq!(
            directory.join(code).map(|handle| handle.tournament_id),
            Ok(session.tournament_id)
        );

        session.cancel(&Caller::new("host"))?;
        assert_eq!(
            directory.join(code).map(|handle| handle.code),
            Err(EngineError::NotFound(code))
        );

        Ok(())
    }

    #[test]
    fn unknown_codes_and_bad_seeds() {
        let directory = SessionDirectory::default();

        assert_eq!(
            directory.join(42).map(|handle| handle.code),
            Err(EngineError::NotFound(42))
        );
        assert_eq!(
            directory
                .create(&items()[..4], "digits", BracketSize::_8, "host")
                .map(|handle| handle.code),
            Err(EngineError::Validation(
                crate::error::ValidationError::InsufficientItems {
                    needed: 8,
                    available: 4
                }
            ))
        );
        assert!(directory.live_codes().is_empty());
    }

    #[test]
    fn catalog_datasets() -> anyhow::Result<()> {
        let directory = SessionDirectory::default();
        let mut catalog = RonCatalog::default();
        catalog.insert("digits", items());

        let session = directory.create_from_catalog(&catalog, "digits", BracketSize::_8, "host")?;
        assert_eq!(session.snapshot()?.tournament.dataset_name, "digits");
        assert!(
            directory
                .create_from_catalog(&catalog, "letters", BracketSize::_8, "host")
                .is_err()
        );

        Ok(())
    }

    #[test]
    fn restored_sessions_keep_their_code() -> anyhow::Result<()> {
        let directory = SessionDirectory::default();
        let session = directory.create(&items(), "digits", BracketSize::_8, "host")?;
        session.join(Profile::new("p", "Pat"))?;
        let snapshot = session.snapshot()?;
        let code = session.code;

        let other = SessionDirectory::default();
        let restored = other.register(snapshot)?;

        assert_eq!(restored.code, code);
        assert_eq!(restored.snapshot()?.participants.len(), 1);

        let fresh = other.create(&items(), "digits", BracketSize::_8, "host")?;
        assert!(fresh.tournament_id > restored.tournament_id);

        Ok(())
    }

    #[test]
    fn snapshots_survive_a_restart() -> anyhow::Result<()> {
        let directory = SessionDirectory::new(
            Config {
                voting_window_seconds: Some(60),
                ..Config::default()
            },
            Arc::new(Mutex::new(MemoryHistoryStore::default())),
        );
        let session = directory.create(&items(), "digits", BracketSize::_8, "host")?;
        session.start(&Caller::new("host"))?;
        directory.add_participant(session.code, Profile::new("p", "Pat"))?;
        session.vote("p", "2")?;

        let saved = postcard::to_allocvec(&directory.snapshot_all())?;
        let snapshots: Vec<SessionSnapshot> = postcard::from_bytes(&saved)?;
        assert_eq!(snapshots, directory.snapshot_all());

        let restarted = SessionDirectory::default();
        for snapshot in snapshots {
            restarted.register(snapshot)?;
        }

        let restored = restarted.join(session.code)?;
        assert_eq!(restored.tournament_id, session.tournament_id);

        let before = session.snapshot()?;
        let after = restored.snapshot()?;
        assert_eq!(after.tournament.status, Status::Active);
        assert_eq!(after.participants.len(), 1);

        let game = after.tournament.current_match();
        let vote = game.and_then(|game| game.votes.get("p"));
        assert_eq!(game.map(|game| (game.tally.a, game.tally.b)), Some((0, 1)));
        assert_eq!(vote.map(|vote| vote.choice), Some(Choice::B));

        let deadline = before.tournament.current_match().map(|game| game.closes_at);
        assert_eq!(game.map(|game| game.closes_at), deadline);
        assert_eq!(
            after.tournament.voting_window,
            Some(Duration::from_secs(60))
        );

        // The participant carries on voting in the restored session.
        restored.vote("p", "1")?;
        let snapshot = restored.snapshot()?;
        let game = snapshot.tournament.current_match();
        assert_eq!(game.map(|game| (game.tally.a, game.tally.b)), Some((1, 0)));

        Ok(())
    }
}
