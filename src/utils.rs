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

use std::{env, fs, io::Write, path::PathBuf};

use chrono::Utc;
use env_logger::Builder;
use log::LevelFilter;

use crate::HOME;

pub fn init_logger(name: &str, debug: bool, systemd: bool) {
    let mut builder = Builder::new();

    if systemd {
        builder.format(|formatter, record| {
            writeln!(formatter, "[{}]: {}", record.level(), record.args())
        });
    } else {
        builder.format(|formatter, record| {
            writeln!(
                formatter,
                "{} [{}] ({}): {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S %z"),
                record.level(),
                record.target(),
                record.args()
            )
        });
    }

    if let Ok(var) = env::var("RUST_LOG") {
        builder.parse_filters(&var);
    } else if debug {
        builder.filter(Some(name), LevelFilter::Debug);
        builder.filter(Some("bracket_poll"), LevelFilter::Debug);
        builder.filter(None, LevelFilter::Info);
    } else {
        // if no RUST_LOG provided, default to logging at the Info level
        builder.filter(None, LevelFilter::Info);
    }

    builder.init();
}

/// The folder every data file lives in, falling back to the working
/// directory.
#[must_use]
pub fn data_folder() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(HOME))
        .unwrap_or_default()
}

#[must_use]
pub fn data_file(file: &str) -> PathBuf {
    data_folder().join(file)
}

/// # Errors
///
/// If the folder does not exist and cannot be created.
pub fn create_data_folder() -> anyhow::Result<()> {
    let folder = data_folder();
    if !folder.as_os_str().is_empty() {
        fs::create_dir_all(folder)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_files_share_a_folder() {
        assert_eq!(
            data_file("history.ron").parent(),
            Some(data_folder().as_path())
        );
    }
}
