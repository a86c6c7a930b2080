//! `notebox`: post, edit and read notes on a board shared by every process
//! on the machine.

mod board;
mod cli;
mod shell;

use std::io;
use std::process::ExitCode;

use clap::Parser;
use eyre::WrapErr;
use notebox_core::{Author, NoteError, NoteText, Segment};
use tokio::signal::unix::{Signal as SignalStream, SignalKind, signal};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::board::Board;
use crate::cli::{Args, Command};
use crate::shell::Shell;

/// Exit code for a recoverable operation error.
const EXIT_RECOVERABLE: u8 = 2;

fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = args.board_config()?;

    let command = match args.command.clone().unwrap_or(Command::Shell) {
        Command::Purge => {
            let removed = Segment::purge(&config).wrap_err("failed to purge the board")?;
            if removed {
                println!("Board removed.");
            } else {
                println!("No board to remove.");
            }
            return Ok(ExitCode::SUCCESS);
        }
        command => command,
    };

    let author = Author::truncate(&args.author_name()?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("failed to build the runtime")?;
    // Installed before joining; a signal that lands mid-join is picked up
    // by `run` once the board is held.
    let signals = {
        let _guard = runtime.enter();
        Signals::install().wrap_err("failed to install signal handlers")?
    };
    let board = Board::open(&config).wrap_err("failed to join the board")?;

    let outcome = runtime.block_on(run(board.clone(), author, command, signals));
    // A shell interrupted by a signal is still blocked reading stdin.
    runtime.shutdown_background();

    let left = leave(&board);
    let code = outcome?;
    left?;
    Ok(code)
}

/// Run `command` until it finishes or a termination signal arrives.
async fn run(
    board: Board,
    author: Author,
    command: Command,
    mut signals: Signals,
) -> eyre::Result<ExitCode> {
    let work = tokio::task::spawn_blocking(move || execute(&board, &author, command));

    tokio::select! {
        biased;
        received = signals.recv() => {
            debug!(signal = ?received, "received signal; leaving board");
            Ok(received.exit_code())
        }
        joined = work => joined.wrap_err("command task failed")?,
    }
}

fn execute(board: &Board, author: &Author, command: Command) -> eyre::Result<ExitCode> {
    let result = match command {
        Command::Shell => {
            Shell::new(board, author.clone(), io::stdin().lock(), io::stdout().lock()).run()?;
            Ok(())
        }
        Command::List { mine } => {
            let notes = board.with(|session| {
                if mine {
                    session.list_by(author)
                } else {
                    session.list()
                }
            })?;
            match notes {
                Ok(notes) => shell::render(&mut io::stdout().lock(), &notes).map(Ok)?,
                Err(e) => Err(e),
            }
        }
        Command::Add { text } => {
            if text.trim().is_empty() {
                eprintln!("error: note text cannot be empty");
                return Ok(ExitCode::from(EXIT_RECOVERABLE));
            }
            let text = NoteText::truncate(&text);
            board
                .with(|session| session.create(author, &text))?
                .map(|index| println!("Note {index} added."))
        }
        Command::Edit { index, text } => {
            if text.trim().is_empty() {
                eprintln!("error: note text cannot be empty");
                return Ok(ExitCode::from(EXIT_RECOVERABLE));
            }
            let text = NoteText::truncate(&text);
            board
                .with(|session| session.update(index, author, &text))?
                .map(|()| println!("Note {index} updated."))
        }
        Command::Delete { index } => board
            .with(|session| session.delete(index, author))?
            .map(|()| println!("Note {index} deleted.")),
        Command::Status => board
            .with(|session| Ok((session.stats()?, session.is_robust())))?
            .map(|(stats, robust)| {
                println!("Sessions:     {}", stats.sessions);
                println!("Notes:        {}/{}", stats.active_notes, stats.capacity);
                println!("Lock:         {}", if robust { "robust" } else { "plain" });
            }),
        Command::Purge => unreachable!("purge never joins the board"),
    };

    Ok(exit_code(result))
}

fn exit_code(result: Result<(), NoteError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_RECOVERABLE)
        }
    }
}

fn leave(board: &Board) -> eyre::Result<()> {
    match board.leave() {
        Some(Ok(departure)) => {
            debug!(?departure, "left board");
            Ok(())
        }
        Some(Err(e)) => Err(e).wrap_err("failed to leave the board"),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Interrupt,
    Terminate,
    Hangup,
}

impl Signal {
    /// Shell convention: 128 plus the signal number.
    fn exit_code(self) -> ExitCode {
        let signo = match self {
            Self::Hangup => 1,
            Self::Interrupt => 2,
            Self::Terminate => 15,
        };
        ExitCode::from(128 + signo)
    }
}

/// Handlers for the signals that end a session, registered before the
/// board is joined.
struct Signals {
    interrupt: SignalStream,
    terminate: SignalStream,
    hangup: SignalStream,
}

impl Signals {
    fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::Interrupt,
            _ = self.terminate.recv() => Signal::Terminate,
            _ = self.hangup.recv() => Signal::Hangup,
        }
    }
}
