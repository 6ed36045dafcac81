use std::fmt;
use std::io::{self, BufRead};
use std::str::FromStr;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use crate::config::{Language, ProficiencyLevel, SessionConfig, LANGUAGES};
use crate::controller::{SessionStatus, Snapshot};
use crate::state_machine::ConnectionState;

/// Output volume above which the tutor counts as speaking.
pub const SPEAKING_THRESHOLD: f32 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Language(Language),
    Level(ProficiencyLevel),
    Status,
    Languages,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or("").to_ascii_lowercase();
        let arg = words.next();
        match (verb.as_str(), arg) {
            ("start", None) => Ok(ConsoleCommand::Start),
            ("stop", None) => Ok(ConsoleCommand::Stop),
            ("lang" | "language", Some(code)) => Language::find(code)
                .map(ConsoleCommand::Language)
                .ok_or_else(|| format!("unknown language '{}', try 'languages'", code)),
            ("level", Some(level)) => level.parse().map(ConsoleCommand::Level),
            ("status", None) => Ok(ConsoleCommand::Status),
            ("languages", None) => Ok(ConsoleCommand::Languages),
            ("help" | "?", None) => Ok(ConsoleCommand::Help),
            ("quit" | "exit", None) => Ok(ConsoleCommand::Quit),
            ("", _) => Err(String::new()),
            _ => Err(format!("unrecognised command '{}', try 'help'", line.trim())),
        }
    }
}

/// Reads learner intents from stdin, one command per line.
///
/// The read blocks, so it runs on its own thread; the process does not wait
/// for it on exit.
pub struct Console {
    tx: mpsc::Sender<ConsoleCommand>,
}

impl Console {
    pub fn new(tx: mpsc::Sender<ConsoleCommand>) -> Self {
        Self { tx }
    }

    pub fn spawn(self) -> anyhow::Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("console-input".into())
            .spawn(move || {
                if let Err(e) = self.run(io::stdin().lock()) {
                    log::error!("Console error: {}", e);
                }
            })?;
        Ok(handle)
    }

    fn run(self, input: impl BufRead) -> io::Result<()> {
        for line in input.lines() {
            match line?.parse::<ConsoleCommand>() {
                Ok(cmd) => {
                    if self.tx.blocking_send(cmd).is_err() {
                        break;
                    }
                }
                Err(msg) if msg.is_empty() => {}
                Err(msg) => println!("{}", msg),
            }
        }
        log::debug!("Console input closed");
        Ok(())
    }
}

pub fn print_help() {
    println!("Commands:");
    println!("  start              begin a practice session");
    println!("  stop               end the session");
    println!("  lang <code>        language for the next session");
    println!("  level <level>      beginner | intermediate | advanced");
    println!("  status             show the session state");
    println!("  languages          list available languages");
    println!("  quit               leave");
}

pub fn print_languages() {
    for entry in LANGUAGES {
        println!("  {:<4}{:<12}voice {}", entry.code, entry.display_name, entry.voice);
    }
}

/// One-line description of a state change.
pub fn describe(status: &SessionStatus) -> String {
    let label = match status.state {
        ConnectionState::Disconnected => "Ready to practice",
        ConnectionState::Connecting => "Connecting...",
        ConnectionState::Connected => "Conversation active",
        ConnectionState::Error => "Session failed",
    };
    match &status.error_message {
        Some(msg) => format!("[{}] {}: {}", status.state, label, msg),
        None => format!("[{}] {}", status.state, label),
    }
}

pub fn print_snapshot(snapshot: &Snapshot, next: &SessionConfig) {
    println!(
        "{}",
        describe(&SessionStatus {
            state: snapshot.state,
            error_message: snapshot.error_message.clone(),
        })
    );
    if let Some(session) = &snapshot.session {
        println!(
            "  practicing {} ({})",
            session.language.display_name, session.level
        );
    }
    if snapshot.state == ConnectionState::Connected {
        println!("  volume {}", VolumeMeter(snapshot.volume));
    }
    println!(
        "  next session: {} ({})",
        next.language.display_name, next.level
    );
}

/// Ten-cell bar for a volume in [0, 1].
pub struct VolumeMeter(pub f32);

impl fmt::Display for VolumeMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells = (self.0.clamp(0.0, 1.0) * 10.0).round() as usize;
        write!(f, "[{}{}] {:.2}", "#".repeat(cells), "-".repeat(10 - cells), self.0)
    }
}

/// Tracks whether the tutor is audible, reporting only flips.
#[derive(Debug, Default)]
pub struct ActivityHint {
    speaking: bool,
}

impl ActivityHint {
    pub fn update(&mut self, volume: f32) -> Option<&'static str> {
        let speaking = volume > SPEAKING_THRESHOLD;
        if speaking == self.speaking {
            return None;
        }
        self.speaking = speaking;
        Some(if speaking { "Tutor is speaking..." } else { "Tutor is listening..." })
    }

    pub fn reset(&mut self) {
        self.speaking = false;
    }
}
