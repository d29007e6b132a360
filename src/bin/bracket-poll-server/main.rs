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

#![deny(clippy::expect_used)]
#![deny(clippy::indexing_slicing)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]

mod command_line;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    fs::{self, File},
    io::{BufRead, BufReader, Read, Write},
    net::{TcpListener, TcpStream},
    path::Path,
    process::exit,
    str::FromStr,
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, Sender},
    },
    thread,
};

use bracket_poll::{
    JoinCode, SERVER_PORT, VERSION_ID,
    bracket::BracketSize,
    config::Config,
    directory::SessionDirectory,
    error::EngineError,
    event::Event,
    history::{self, MemoryHistoryStore, RonHistoryStore, SharedHistory},
    item::{Catalog, RonCatalog},
    participant::Profile,
    session::{SessionHandle, SessionSnapshot},
    utils::{self, create_data_folder, data_file},
};
use clap::Parser;
use log::{debug, error, info};

use crate::command_line::Args;

const ACTIVE_TOURNAMENTS_FILE: &str = "active-tournaments.postcard";
const CATALOG_FILE: &str = "catalog.ron";
const CONFIG_FILE: &str = "config.ron";
const HISTORY_FILE: &str = "history.ron";
const HISTORY_LIMIT: usize = 10;
const USERNAME_LENGTH: usize = 16;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    utils::init_logger("bracket_poll_server", args.debug, args.systemd);

    if args.man {
        return Args::generate_man_page();
    }

    let server = if args.skip_the_data_file {
        Server::new(
            config(Config::default(), &args),
            RonCatalog::default(),
            Arc::new(Mutex::new(MemoryHistoryStore::default())),
        )
    } else {
        create_data_folder()?;
        let server = Server::new(
            config(Config::load(&data_file(CONFIG_FILE))?, &args),
            RonCatalog::load(&data_file(CATALOG_FILE))?,
            Arc::new(Mutex::new(RonHistoryStore::open(&data_file(HISTORY_FILE))?)),
        );
        let snapshot_file = data_file(ACTIVE_TOURNAMENTS_FILE);
        server.load_active_tournaments(&snapshot_file)?;

        let server_clone = server.clone();
        let systemd = args.systemd;
        ctrlc::set_handler(move || {
            if !systemd {
                println!();
            }
            handle_error(server_clone.save_active_tournaments(&snapshot_file));
            exit(0);
        })?;

        server
    };

    let port = args
        .port
        .map_or_else(|| SERVER_PORT.to_string(), |port| format!(":{port}"));

    let listener = if let Some(host) = &args.host {
        TcpListener::bind(format!("{host}{port}"))?
    } else {
        match TcpListener::bind(format!("[::]{port}")) {
            Ok(listener) => listener,
            Err(error) => {
                error!("TcpLister::bind: {error}");
                TcpListener::bind(format!("0.0.0.0{port}"))?
            }
        }
    };

    info!("listening on {} ...", listener.local_addr()?);
    server.serve(&listener);

    Ok(())
}

fn config(mut config: Config, args: &Args) -> Config {
    if let Some(seconds) = args.voting_window {
        config.voting_window_seconds = Some(seconds);
    }

    config
}

fn handle_error<T, E: fmt::Display>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            error!("{error}");
            exit(1)
        }
    }
}

#[derive(Clone)]
struct Server {
    directory: SessionDirectory,
    catalog: Arc<dyn Catalog + Send + Sync>,
}

impl Server {
    fn new(config: Config, catalog: RonCatalog, history: SharedHistory) -> Self {
        Self {
            directory: SessionDirectory::new(config, history),
            catalog: Arc::new(catalog),
        }
    }

    fn serve(&self, listener: &TcpListener) {
        for (index, stream) in (1_usize..).zip(listener.incoming()) {
            let stream = match stream {
                Ok(stream) => stream,
                Err(error) => {
                    error!("stream: {error}");
                    continue;
                }
            };

            let server = self.clone();
            thread::spawn(move || {
                if let Err(error) = server.login(index, stream) {
                    error!("{index} login: {error}");
                }
            });
        }
    }

    fn login(&self, index: usize, mut stream: TcpStream) -> anyhow::Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut buf = String::new();
        let mut profile = None;

        for _ in 0..100 {
            buf.clear();
            reader.read_line(&mut buf)?;

            if buf.trim().is_empty() {
                return Err(anyhow::Error::msg(
                    "The user sent a command without logging in, then quit.",
                ));
            }

            if buf.trim().chars().any(|ch| ch.is_control()) {
                return Err(anyhow::Error::msg(
                    "there are control characters in the username",
                ));
            }

            let mut words = buf.split_ascii_whitespace();
            let (Some(version_id), Some("login"), Some(username)) =
                (words.next(), words.next(), words.next())
            else {
                stream.write_all(b"? login _\n")?;
                continue;
            };

            if version_id != VERSION_ID {
                stream.write_all(b"? login wrong_version\n")?;
                continue;
            }

            if username.len() > USERNAME_LENGTH {
                stream.write_all(b"? login username_too_long\n")?;
                continue;
            }

            let display_name: Vec<&str> = words.collect();
            let display_name = if display_name.is_empty() {
                username.to_string()
            } else {
                display_name.join(" ")
            };

            profile = Some(Profile::new(username, &display_name));
            break;
        }

        let Some(profile) = profile else {
            return Err(anyhow::Error::msg("the user failed to login"));
        };

        info!("{index} {} logged in", profile.user_id);
        stream.write_all(b"= login\n")?;

        let (client_tx, client_rx) = mpsc::channel();
        thread::spawn(move || {
            if let Err(error) = receiving_and_writing(stream, &client_rx) {
                error!("receiving_and_writing: {error}");
            }
        });

        let mut connection = Connection {
            server: self.clone(),
            profile,
            tx: client_tx,
            watching: HashSet::new(),
            hosted: HashMap::new(),
        };

        for _ in 0..1_000_000 {
            buf.clear();
            if let Err(error) = reader.read_line(&mut buf) {
                error!("{index} reader.read_line(): {error}");
                break;
            }

            let line = buf.trim();
            if line.is_empty() || line.chars().any(|ch| ch.is_control()) {
                break;
            }

            debug!("{index} {} {line}", connection.profile.user_id);
            if line == "quit" {
                let _ok = connection.tx.send("= quit".to_string());
                break;
            }

            let reply = connection.handle_command(line);
            connection.tx.send(reply)?;
        }

        connection.disconnect();
        info!("{index} {} logged out", connection.profile.user_id);

        Ok(())
    }

    fn load_active_tournaments(&self, path: &Path) -> anyhow::Result<()> {
        if !fs::exists(path)? {
            return Ok(());
        }

        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let snapshots: Vec<SessionSnapshot> = postcard::from_bytes(data.as_slice())?;
        for snapshot in snapshots {
            let id = snapshot.tournament.id;
            match self.directory.register(snapshot) {
                Ok(session) => info!("{} restored tournament {id}", session.code),
                Err(error) => error!("restore tournament {id}: {error}"),
            }
        }

        // A restored tournament must not be restored twice.
        fs::remove_file(path)?;

        Ok(())
    }

    fn save_active_tournaments(&self, path: &Path) -> anyhow::Result<()> {
        info!("saving active tournaments...");
        let snapshots = self.directory.snapshot_all();

        let mut file = File::create(path)?;
        file.write_all(postcard::to_allocvec(&snapshots)?.as_slice())?;

        info!("saved {} active tournaments", snapshots.len());
        Ok(())
    }
}

/// One logged in client.
struct Connection {
    server: Server,
    profile: Profile,
    tx: Sender<String>,
    watching: HashSet<JoinCode>,
    /// Sessions this client created or drove, kept after their code is released.
    hosted: HashMap<JoinCode, SessionHandle>,
}

impl Connection {
    fn handle_command(&mut self, line: &str) -> String {
        let words: Vec<&str> = line.split_ascii_whitespace().collect();
        let Some((command, the_rest)) = words.split_first() else {
            return "? _ empty".to_string();
        };

        match self.run(command, the_rest) {
            Ok(reply) => reply,
            Err(reason) => {
                debug!("{} {command}: {reason}", self.profile.user_id);
                format!("? {command} {reason}")
            }
        }
    }

    fn run(&mut self, command: &str, the_rest: &[&str]) -> Result<String, &'static str> {
        let user_id = self.profile.user_id.clone();
        let directory = &self.server.directory;

        match command {
            "datasets" => Ok(format!(
                "= datasets {}",
                self.server.catalog.datasets().join(" ")
            )),
            "create" => {
                let dataset = the_rest.first().ok_or("missing_dataset")?;
                let bracket_size = match the_rest.get(1) {
                    Some(size) => {
                        BracketSize::from_str(size).map_err(|_| "invalid_bracket_size")?
                    }
                    None => BracketSize::default(),
                };

                let session = directory
                    .create_from_catalog(
                        self.server.catalog.as_ref(),
                        dataset,
                        bracket_size,
                        &user_id,
                    )
                    .map_err(|error| {
                        error.downcast_ref::<EngineError>().map_or_else(
                            || {
                                error!("{user_id} create {dataset}: {error}");
                                "unknown_dataset"
                            },
                            EngineError::reason,
                        )
                    })?;

                let reply = format!("= create {} {}", session.code, session.tournament_id);
                self.hosted.insert(session.code, session);

                Ok(reply)
            }
            "start" | "advance" | "cancel" => {
                let session = self.hosted_session(the_rest)?;
                let caller = self.server.directory.caller(&user_id);

                let result = match command {
                    "start" => session.start(&caller),
                    "advance" => session.advance(&caller),
                    _ => session.cancel(&caller),
                };
                result.map_err(|error| error.reason())?;

                Ok(format!("= {command} {}", session.code))
            }
            "join" => {
                let code = code(the_rest)?;
                let display_name = the_rest.get(1..).unwrap_or_default().join(" ");
                let profile = if display_name.is_empty() {
                    self.profile.clone()
                } else {
                    Profile::new(&user_id, &display_name)
                };

                let session = directory
                    .add_participant(code, profile)
                    .map_err(|error| error.reason())?;
                self.watch(&session)?;

                Ok(format!("= join {code}"))
            }
            "vote" => {
                let session = self.session(the_rest)?;
                let text = the_rest.get(1..).unwrap_or_default().join(" ");
                session
                    .vote(&user_id, &text)
                    .map_err(|error| error.reason())?;

                Ok(format!("= vote {}", session.code))
            }
            "leave" => {
                let session = self.session(the_rest)?;
                session.leave(&user_id).map_err(|error| error.reason())?;

                Ok(format!("= leave {}", session.code))
            }
            "status" => {
                let session = self.session(the_rest)?;
                let snapshot = session.snapshot().map_err(|error| error.reason())?;
                let tournament =
                    ron::ser::to_string(&snapshot.tournament).map_err(|_| "serialization")?;

                Ok(format!("= status {} {tournament}", session.code))
            }
            "history" => {
                let limit = match the_rest.first() {
                    Some(limit) => usize::from_str(limit).map_err(|_| "invalid_limit")?,
                    None => HISTORY_LIMIT,
                };
                let records = history::list(directory.history(), limit);
                let records = ron::ser::to_string(&records).map_err(|_| "serialization")?;

                Ok(format!("= history {records}"))
            }
            _ => Err("unknown_command"),
        }
    }

    fn session(&self, the_rest: &[&str]) -> Result<SessionHandle, &'static str> {
        self.server
            .directory
            .join(code(the_rest)?)
            .map_err(|error| error.reason())
    }

    /// Like `session`, but a tournament this client already drove can still
    /// be reached after it ended and gave its code back.
    fn hosted_session(&mut self, the_rest: &[&str]) -> Result<SessionHandle, &'static str> {
        let code = code(the_rest)?;
        match self.server.directory.join(code) {
            Ok(session) => {
                self.hosted.insert(code, session.clone());
                Ok(session)
            }
            Err(error) => self
                .hosted
                .get(&code)
                .cloned()
                .ok_or_else(|| error.reason()),
        }
    }

    /// Forwards the session's events to this client, and tells a late joiner
    /// which match is open.
    fn watch(&mut self, session: &SessionHandle) -> Result<(), &'static str> {
        if !self.watching.insert(session.code) {
            return Ok(());
        }

        let (event_tx, event_rx) = mpsc::channel::<Event>();
        session
            .subscribe(event_tx)
            .map_err(|error| error.reason())?;

        let tx = self.tx.clone();
        thread::spawn(move || {
            for event in event_rx {
                if tx.send(event.to_string()).is_err() {
                    return;
                }
            }
        });

        let snapshot = session.snapshot().map_err(|error| error.reason())?;
        if let Some(game) = snapshot.tournament.current_match() {
            let event = Event::MatchOpened {
                round: game.round,
                slot: game.slot,
                item_a: game.item_a.clone(),
                item_b: game.item_b.clone(),
                closes_at: game.closes_at,
            };
            let _ok = self.tx.send(event.to_string());
        }

        Ok(())
    }

    /// Marks the user absent everywhere they joined. Their votes stay.
    fn disconnect(&mut self) {
        for code in self.watching.drain() {
            if let Ok(session) = self.server.directory.join(code) {
                let _ok = session.leave(&self.profile.user_id);
            }
        }

        let _ok = self.tx.send("= logout".to_string());
    }
}

fn code(the_rest: &[&str]) -> Result<JoinCode, &'static str> {
    let code = the_rest.first().ok_or("missing_code")?;
    JoinCode::from_str(code).map_err(|_| "invalid_code")
}

fn receiving_and_writing<T: Send + Write>(
    mut stream: T,
    client_rx: &Receiver<String>,
) -> anyhow::Result<()> {
    for mut message in client_rx {
        if message == "= logout" {
            return Ok(());
        }

        message.push('\n');
        if let Err(error) = stream.write_all(message.as_bytes()) {
            return Err(anyhow::Error::msg(format!("{message}: {error}")));
        }
    }

    Ok(())
}
