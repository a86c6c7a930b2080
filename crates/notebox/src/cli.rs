//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::{WrapErr, bail, eyre};
use notebox_core::BoardConfig;
use notebox_core::config::{DEFAULT_KEY_PATH, DEFAULT_PROJECT_ID};

#[derive(Parser, Debug)]
#[command(name = "notebox", version, about = "A note board shared between processes")]
pub struct Args {
    /// Existing path used to derive the segment key.
    #[arg(long, default_value = DEFAULT_KEY_PATH)]
    pub key_path: PathBuf,

    /// Single ASCII character used to derive the segment key.
    #[arg(long, default_value_t = DEFAULT_PROJECT_ID as char)]
    pub project_id: char,

    /// Create the lock without owner-death recovery.
    #[arg(long)]
    pub no_robust: bool,

    /// Name notes are posted under (defaults to $USER).
    #[arg(long, short)]
    pub author: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Interactive session (default).
    Shell,
    /// Print the board.
    List {
        /// Only show your own notes.
        #[arg(long)]
        mine: bool,
    },
    /// Post a note.
    Add { text: String },
    /// Replace the text of one of your notes.
    Edit { index: usize, text: String },
    /// Delete one of your notes.
    Delete { index: usize },
    /// Show session and note counts.
    Status,
    /// Remove the segment for this key, even if sessions remain.
    Purge,
}

impl Args {
    pub fn board_config(&self) -> eyre::Result<BoardConfig> {
        let project_id = u8::try_from(self.project_id)
            .ok()
            .filter(|id| *id != 0 && id.is_ascii())
            .ok_or_else(|| eyre!("--project-id must be a non-NUL ASCII character"))?;
        Ok(BoardConfig::default()
            .with_key(&self.key_path, project_id)
            .with_robust_lock(!self.no_robust))
    }

    pub fn author_name(&self) -> eyre::Result<String> {
        if let Some(author) = &self.author {
            return Ok(author.clone());
        }
        let user = std::env::var("USER").wrap_err("no --author given and $USER is unset")?;
        if user.is_empty() {
            bail!("no --author given and $USER is empty");
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_shell_with_well_known_key() {
        let args = Args::try_parse_from(["notebox", "--author", "alice"]).unwrap();
        assert_eq!(args.command, None);
        let config = args.board_config().unwrap();
        assert_eq!(config, BoardConfig::default());
        assert_eq!(args.author_name().unwrap(), "alice");
    }

    #[test]
    fn parses_edit() {
        let args = Args::try_parse_from([
            "notebox", "-a", "bob", "--key-path", "/var/tmp", "--project-id", "Q", "--no-robust",
            "edit", "4", "new text",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Some(Command::Edit {
                index: 4,
                text: "new text".into()
            })
        );
        let config = args.board_config().unwrap();
        assert_eq!(config.project_id, b'Q');
        assert!(!config.robust_lock);
    }

    #[test]
    fn rejects_non_numeric_index() {
        assert!(Args::try_parse_from(["notebox", "delete", "three"]).is_err());
    }

    #[test]
    fn rejects_non_ascii_project_id() {
        let args = Args::try_parse_from(["notebox", "--project-id", "é"]).unwrap();
        assert!(args.board_config().is_err());
    }
}
