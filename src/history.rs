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
    fmt,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};

use crate::{TournamentId, item::Item, tournament::Tournament};

pub type SharedHistory = Arc<Mutex<dyn HistoryStore + Send>>;

/// The summary written once when a tournament finishes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub tournament_id: TournamentId,
    pub dataset_name: String,
    pub winner_item: Item,
    pub total_participants: usize,
    pub total_matches: usize,
    pub finished_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Summarizes a finished tournament, `None` for any other.
    #[must_use]
    pub fn archive(tournament: &Tournament, total_participants: usize) -> Option<Self> {
        Some(Self {
            tournament_id: tournament.id,
            dataset_name: tournament.dataset_name.clone(),
            winner_item: tournament.winner()?.clone(),
            total_participants,
            total_matches: tournament.matches.len(),
            finished_at: tournament.finished_at?,
        })
    }
}

impl fmt::Display for HistoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID: {}, Dataset: {}, Winner: {}, Participants: {}, Matches: {}",
            self.tournament_id,
            self.dataset_name,
            self.winner_item,
            self.total_participants,
            self.total_matches,
        )
    }
}

pub trait HistoryStore {
    /// # Errors
    ///
    /// If the record could not be stored.
    fn append(&mut self, record: HistoryRecord) -> anyhow::Result<()>;

    /// The `limit` most recent records, newest first.
    fn list(&self, limit: usize) -> Vec<HistoryRecord>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryHistoryStore(pub Vec<HistoryRecord>);

impl HistoryStore for MemoryHistoryStore {
    fn append(&mut self, record: HistoryRecord) -> anyhow::Result<()> {
        self.0.push(record);
        Ok(())
    }

    fn list(&self, limit: usize) -> Vec<HistoryRecord> {
        self.0.iter().rev().take(limit).cloned().collect()
    }
}

/// One RON record per line, only ever appended to.
#[derive(Clone, Debug)]
pub struct RonHistoryStore {
    path: PathBuf,
    records: Vec<HistoryRecord>,
}

impl RonHistoryStore {
    /// # Errors
    ///
    /// If the file exists and a line is not a valid record.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut records = Vec::new();

        match fs::read_to_string(path) {
            Ok(string) => {
                for line in string.lines().filter(|line| !line.trim().is_empty()) {
                    let record: HistoryRecord = match ron::from_str(line) {
                        Ok(record) => record,
                        Err(err) => {
                            return Err(anyhow::Error::msg(format!(
                                "RON: {}: {err}",
                                path.display(),
                            )));
                        }
                    };
                    records.push(record);
                }
            }
            Err(err) => match err.kind() {
                ErrorKind::NotFound => {}
                _ => return Err(err.into()),
            },
        }

        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }
}

impl HistoryStore for RonHistoryStore {
    fn append(&mut self, record: HistoryRecord) -> anyhow::Result<()> {
        let mut record_string = ron::ser::to_string(&record)?;
        record_string.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.write_all(record_string.as_bytes())?;
        self.records.push(record);

        Ok(())
    }

    fn list(&self, limit: usize) -> Vec<HistoryRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }
}

/// Lists the store, logging instead of failing on a poisoned lock.
#[must_use]
pub fn list(history: &SharedHistory, limit: usize) -> Vec<HistoryRecord> {
    match history.lock() {
        Ok(history) => history.list(limit),
        Err(err) => {
            error!("history: {err}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{bracket::BracketSize, tournament::Caller};

    fn record(id: TournamentId) -> HistoryRecord {
        HistoryRecord {
            tournament_id: id,
            dataset_name: "snacks".to_string(),
            winner_item: Item::new("1", "Crisps"),
            total_participants: 3,
            total_matches: 7,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn newest_first() -> anyhow::Result<()> {
        let mut store = MemoryHistoryStore::default();
        for id in 0..5 {
            store.append(record(id))?;
        }

        let ids: Vec<_> = store.list(3).iter().map(|r| r.tournament_id).collect();
        assert_eq!(ids, vec![4, 3, 2]);
        assert_eq!(store.list(10).len(), 5);

        Ok(())
    }

    #[test]
    fn ron_store_survives_a_reopen() -> anyhow::Result<()> {
        let path = env::temp_dir().join(format!("bracket-poll-history-{}.ron", std::process::id()));
        let _ok = fs::remove_file(&path);

        let mut store = RonHistoryStore::open(&path)?;
        store.append(record(1))?;
        store.append(record(2))?;

        let reopened = RonHistoryStore::open(&path)?;
        let ids: Vec<_> = reopened.list(10).iter().map(|r| r.tournament_id).collect();
        assert_eq!(ids, vec![2, 1]);

        fs::remove_file(&path)?;
        Ok(())
    }

    #[test]
    fn only_finished_tournaments_are_archived() -> anyhow::Result<()> {
        let items: Vec<_> = (0..8).map(|i| Item::new(&i.to_string(), "x")).collect();
        let host = Caller::new("host");
        let mut tournament = Tournament::create(
            9,
            "digits",
            &items,
            BracketSize::_8,
            "host",
            &mut StdRng::seed_from_u64(0),
        )?;

        assert!(HistoryRecord::archive(&tournament, 0).is_none());

        tournament.start(&host, Utc::now())?;
        for _ in 0..7 {
            tournament.advance(&host, Utc::now())?;
        }

        let record = HistoryRecord::archive(&tournament, 4);
        assert_eq!(
            record.as_ref().map(|r| r.winner_item.id.as_str()),
            Some("0")
        );
        assert_eq!(record.as_ref().map(|r| r.total_matches), Some(7));

        Ok(())
    }
}
