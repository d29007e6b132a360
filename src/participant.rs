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

use std::fmt;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::ParticipantId;

/// What a client says about itself when it joins.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Profile {
    pub user_id: ParticipantId,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Profile {
    #[must_use]
    pub fn new(user_id: &str, display_name: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            avatar: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Participant {
    pub user_id: ParticipantId,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub present: bool,
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.present {
            write!(f, "{} present", self.user_id)
        } else {
            write!(f, "{} away", self.user_id)
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Participants(pub FxHashMap<ParticipantId, Participant>);

impl Participants {
    /// Adds a participant, or refreshes the profile of one that already
    /// joined. Returns whether the participant is new.
    pub fn join(&mut self, profile: Profile, now: DateTime<Utc>) -> bool {
        if let Some(participant) = self.0.get_mut(&profile.user_id) {
            participant.display_name = profile.display_name;
            participant.avatar = profile.avatar;
            participant.present = true;

            false
        } else {
            self.0.insert(
                profile.user_id.clone(),
                Participant {
                    user_id: profile.user_id,
                    display_name: profile.display_name,
                    avatar: profile.avatar,
                    joined_at: now,
                    present: true,
                },
            );

            true
        }
    }

    /// Returns whether `user_id` is a participant.
    pub fn leave(&mut self, user_id: &str) -> bool {
        if let Some(participant) = self.0.get_mut(user_id) {
            participant.present = false;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.0.contains_key(user_id)
    }

    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&Participant> {
        self.0.get(user_id)
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

impl fmt::Display for Participants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut participants: Vec<_> = self.0.values().map(ToString::to_string).collect();
        participants.sort_unstable();

        write!(f, "{}", participants.join(" "))
    }
}
