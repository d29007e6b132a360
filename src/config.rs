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

use std::{collections::HashSet, fs, io::ErrorKind, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

const CODE_DIGITS: u32 = 6;
const MAX_CODE_ATTEMPTS: usize = 1_000;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Join codes are numbers of exactly this many digits.
    #[serde(default = "code_digits")]
    pub code_digits: u32,
    /// With no window, only the host advances matches.
    #[serde(default)]
    pub voting_window_seconds: Option<u64>,
    /// Users allowed to drive any tournament.
    #[serde(default)]
    pub admins: HashSet<String>,
    #[serde(default = "max_code_attempts")]
    pub max_code_attempts: usize,
}

fn code_digits() -> u32 {
    CODE_DIGITS
}

fn max_code_attempts() -> usize {
    MAX_CODE_ATTEMPTS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            code_digits: CODE_DIGITS,
            voting_window_seconds: None,
            admins: HashSet::new(),
            max_code_attempts: MAX_CODE_ATTEMPTS,
        }
    }
}

impl Config {
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// If the file exists but is not a valid config.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match fs::read_to_string(path) {
            Ok(string) => ron::from_str(&string)
                .map_err(|err| anyhow::Error::msg(format!("RON: {}: {err}", path.display()))),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(Self::default()),
                _ => Err(err.into()),
            },
        }
    }

    #[must_use]
    pub fn voting_window(&self) -> Option<Duration> {
        self.voting_window_seconds
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
    }

    /// The smallest and one past the largest join code.
    #[must_use]
    pub fn code_range(&self) -> (u32, u32) {
        let digits = self.code_digits.clamp(1, 9);
        (10_u32.pow(digits - 1), 10_u32.pow(digits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_fill_in_defaults() -> anyhow::Result<()> {
        let config: Config =
            ron::from_str(r#"(admins: ["alice"], voting_window_seconds: Some(20))"#)?;

        assert_eq!(config.code_digits, 6);
        assert_eq!(config.voting_window(), Some(Duration::from_secs(20)));
        assert!(config.admins.contains("alice"));
        assert_eq!(config.code_range(), (100_000, 1_000_000));

        Ok(())
    }

    #[test]
    fn zero_seconds_means_no_window() {
        let config = Config {
            voting_window_seconds: Some(0),
            ..Config::default()
        };

        assert_eq!(config.voting_window(), None);
    }
}
