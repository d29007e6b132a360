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

use std::io::Write as _;

use bracket_poll::{COPYRIGHT, LONG_VERSION};
use clap::{CommandFactory, Parser};

/// Bracket Poll Server
///
/// This is a TCP server that runs live bracket voting sessions.
#[derive(Parser, Debug)]
#[command(long_version = LONG_VERSION, about = "Bracket Poll Server")]
pub(crate) struct Args {
    /// The address to listen on [default: [::] falling back to 0.0.0.0]
    #[arg(long)]
    pub host: Option<String>,

    /// The port to listen on [default: 49200]
    #[arg(long)]
    pub port: Option<u16>,

    /// Whether to log on the debug level
    #[arg(long)]
    pub debug: bool,

    /// Whether to skip the data file
    ///
    /// Nothing is read from or written to the data folder.
    #[arg(long)]
    pub skip_the_data_file: bool,

    /// Whether the application is being run by systemd
    #[arg(long)]
    pub systemd: bool,

    /// Close every match after this many seconds, overriding config.ron
    ///
    /// 0 leaves advancing to the host.
    #[arg(long, value_name = "SECONDS")]
    pub voting_window: Option<u64>,

    /// Build the manpage
    #[arg(long)]
    pub man: bool,
}

impl Args {
    pub(crate) fn generate_man_page() -> anyhow::Result<()> {
        let mut buffer: Vec<u8> = Vec::default();
        let cmd = Self::command()
            .name("bracket-poll-server")
            .long_version(None);
        let man = clap_mangen::Man::new(cmd).date("2026-10-18");

        man.render(&mut buffer)?;
        write!(buffer, "{COPYRIGHT}")?;

        std::fs::write("bracket-poll-server.1", buffer)?;
        Ok(())
    }
}
