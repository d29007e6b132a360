//! A live single-elimination bracket voting engine and server.
//!
//! Participants join a session with a short numeric code, are shown
//! successive head-to-head match-ups drawn from an item catalog and vote on
//! them. The engine resolves each match, advances the winners through
//! `log2(bracket_size)` rounds and archives the overall winner.
//!
//! ## Feature Flags
//!
//! By default the `server` feature flag is enabled.
//!
//! * bench - enable the criterion benchmarks
//! * server - enable the `bracket-poll-server` binary
//!
//! ## Architecture
//!
//! Every tournament is owned by a [`session::Session`] that runs on its own
//! thread and serializes all votes and transitions for that tournament. The
//! [`directory::SessionDirectory`] maps join codes to those sessions.

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

#![deny(clippy::panic)]

use std::{
    io::{BufRead, BufReader, Write},
    net::TcpStream,
};

pub mod bracket;
pub mod choice;
pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod history;
pub mod item;
pub mod matchup;
pub mod participant;
pub mod session;
pub mod status;
pub mod tournament;
pub mod utils;

pub type TournamentId = u64;
pub type ParticipantId = String;
pub type JoinCode = u32;

pub const HOME: &str = "bracket-poll";
pub const SERVER_PORT: &str = ":49200";
pub const VERSION_ID: &str = "5c1e07b2";

pub const COPYRIGHT: &str = r".SH COPYRIGHT
Copyright (C) 2026 Developers of the bracket-poll project

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU Affero General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU Affero General Public License for more details.

You should have received a copy of the GNU Affero General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.
";

pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "
Copyright (c) 2026 Developers of the bracket-poll project
Licensed under the AGPLv3"
);

/// # Errors
///
/// If read fails.
pub fn read_response(reader: &mut BufReader<TcpStream>) -> anyhow::Result<String> {
    let mut reply = String::new();
    reader.read_line(&mut reply)?;
    log::trace!("<- {}", reply.trim_end());
    Ok(reply)
}

/// # Errors
///
/// If write fails.
pub fn write_command(command: &str, stream: &mut TcpStream) -> anyhow::Result<()> {
    log::trace!("-> {}", command.trim_end());
    stream.write_all(command.as_bytes())?;
    Ok(())
}
