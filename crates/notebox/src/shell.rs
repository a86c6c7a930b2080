//! Line-oriented interactive session.
//!
//! All input for a command is gathered before the board is touched, so the
//! segment lock is never held while waiting on the user.

use std::io::{BufRead, Write};

use notebox_core::{Author, Note, NoteError, NoteText};

use crate::board::Board;

const HELP: &str = "\
Commands:
  list                 show every note
  mine                 show your notes
  add [TEXT]           post a note
  edit [INDEX [TEXT]]  replace the text of one of your notes
  delete [INDEX]       delete one of your notes
  status               show session and note counts
  help                 show this message
  quit                 leave the board";

pub struct Shell<'a, R, W> {
    board: &'a Board,
    author: Author,
    input: R,
    output: W,
}

impl<'a, R: BufRead, W: Write> Shell<'a, R, W> {
    pub fn new(board: &'a Board, author: Author, input: R, output: W) -> Self {
        Self {
            board,
            author,
            input,
            output,
        }
    }

    /// Read and run commands until `quit` or end of input.
    pub fn run(&mut self) -> eyre::Result<()> {
        writeln!(self.output, "Posting as {}. Type 'help' for commands.", self.author)?;
        while let Some(line) = self.prompt("> ")? {
            let line = line.trim();
            let (command, rest) = match line.split_once(char::is_whitespace) {
                Some((command, rest)) => (command, rest.trim()),
                None => (line, ""),
            };
            match command {
                "" => {}
                "list" => self.list(false)?,
                "mine" => self.list(true)?,
                "add" => {
                    if !self.add(rest)? {
                        break;
                    }
                }
                "edit" => {
                    if !self.edit(rest)? {
                        break;
                    }
                }
                "delete" => {
                    if !self.delete(rest)? {
                        break;
                    }
                }
                "status" => self.status()?,
                "help" => writeln!(self.output, "{HELP}")?,
                "quit" | "exit" => break,
                other => writeln!(self.output, "Unknown command '{other}'. Type 'help'.")?,
            }
        }
        Ok(())
    }

    fn list(&mut self, mine: bool) -> eyre::Result<()> {
        let author = &self.author;
        let notes = self.board.with(|session| {
            if mine {
                session.list_by(author)
            } else {
                session.list()
            }
        })?;
        match notes {
            Ok(notes) => render(&mut self.output, &notes)?,
            Err(e) => self.report(e)?,
        }
        Ok(())
    }

    /// Returns `false` if input ended mid-command.
    fn add(&mut self, inline: &str) -> eyre::Result<bool> {
        let Some(body) = self.argument(inline, "Enter note text: ")? else {
            return Ok(false);
        };
        if body.is_empty() {
            writeln!(self.output, "Note text cannot be empty.")?;
            return Ok(true);
        }
        let text = NoteText::truncate(&body);
        let author = &self.author;
        match self.board.with(|session| session.create(author, &text))? {
            Ok(index) => writeln!(self.output, "Note {index} added.")?,
            Err(e) => self.report(e)?,
        }
        Ok(true)
    }

    fn edit(&mut self, inline: &str) -> eyre::Result<bool> {
        let (index, rest) = match inline.split_once(char::is_whitespace) {
            Some((index, rest)) => (index, rest.trim()),
            None => (inline, ""),
        };
        if index.is_empty() {
            self.list(true)?;
        }
        let Some(index) = self.index(index)? else {
            return Ok(false);
        };
        let Some(index) = index else {
            return Ok(true);
        };
        let Some(body) = self.argument(rest, "Enter new text: ")? else {
            return Ok(false);
        };
        if body.is_empty() {
            writeln!(self.output, "Note text cannot be empty.")?;
            return Ok(true);
        }
        let text = NoteText::truncate(&body);
        let author = &self.author;
        match self.board.with(|session| session.update(index, author, &text))? {
            Ok(()) => writeln!(self.output, "Note {index} updated.")?,
            Err(e) => self.report(e)?,
        }
        Ok(true)
    }

    fn delete(&mut self, inline: &str) -> eyre::Result<bool> {
        if inline.is_empty() {
            self.list(true)?;
        }
        let Some(index) = self.index(inline)? else {
            return Ok(false);
        };
        let Some(index) = index else {
            return Ok(true);
        };

        // Checked against a snapshot so the user is not asked to confirm a
        // delete that cannot succeed. The delete itself re-checks under the
        // lock.
        let note = match self.board.with(|session| session.list())? {
            Ok(notes) => notes.into_iter().find(|note| note.index == index),
            Err(e) => return self.report(e).map(|()| true),
        };
        match note {
            None => return self.report(NoteError::NotFound { index }).map(|()| true),
            Some(note) if note.author != self.author => {
                writeln!(self.output, "You can only delete your own notes.")?;
                return Ok(true);
            }
            Some(_) => {}
        }

        let Some(answer) = self.prompt("Are you sure you want to delete this note? [Y/n]: ")?
        else {
            return Ok(false);
        };
        if !matches!(answer.trim(), "y" | "Y") {
            writeln!(self.output, "Delete cancelled.")?;
            return Ok(true);
        }

        let author = &self.author;
        match self.board.with(|session| session.delete(index, author))? {
            Ok(()) => writeln!(self.output, "Note {index} deleted.")?,
            Err(e) => self.report(e)?,
        }
        Ok(true)
    }

    fn status(&mut self) -> eyre::Result<()> {
        match self.board.with(|session| session.stats())? {
            Ok(stats) => {
                writeln!(self.output, "Sessions:     {}", stats.sessions)?;
                writeln!(
                    self.output,
                    "Notes:        {}/{}",
                    stats.active_notes, stats.capacity
                )?;
            }
            Err(e) => self.report(e)?,
        }
        Ok(())
    }

    /// The inline argument if given, otherwise one prompted line. `None` on
    /// end of input.
    fn argument(&mut self, inline: &str, prompt: &str) -> eyre::Result<Option<String>> {
        if !inline.is_empty() {
            return Ok(Some(inline.to_owned()));
        }
        Ok(self.prompt(prompt)?.map(|line| line.trim().to_owned()))
    }

    /// Outer `None` on end of input, inner `None` on a malformed index.
    fn index(&mut self, inline: &str) -> eyre::Result<Option<Option<usize>>> {
        let Some(raw) = self.argument(inline, "Enter note index: ")? else {
            return Ok(None);
        };
        match raw.parse::<usize>() {
            Ok(index) => Ok(Some(Some(index))),
            Err(_) => {
                writeln!(self.output, "Invalid input. Please enter a number.")?;
                Ok(Some(None))
            }
        }
    }

    fn prompt(&mut self, prompt: &str) -> eyre::Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let len = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(len);
        Ok(Some(line))
    }

    fn report(&mut self, error: NoteError) -> eyre::Result<()> {
        writeln!(self.output, "Error: {error}.")?;
        Ok(())
    }
}

pub fn render(out: &mut impl Write, notes: &[Note]) -> std::io::Result<()> {
    if notes.is_empty() {
        return writeln!(out, "No notes found.");
    }
    for note in notes {
        writeln!(out, "[{}] by {} at {}", note.index, note.author, note.timestamp)?;
        writeln!(out, "    {}", note.text)?;
    }
    Ok(())
}
