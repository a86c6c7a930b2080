//! Drives the built binary against real segments, alongside an in-process
//! session that stands in for another user.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use notebox_core::{Author, BoardConfig, NoteText, Segment, Session};

struct Scratch {
    path: PathBuf,
    config: BoardConfig,
}

impl Scratch {
    fn new(name: &str) -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "notebox_cli_{}_{}_{}.key",
            name,
            std::process::id(),
            n
        ));
        std::fs::write(&path, b"").unwrap();
        let config = BoardConfig::default().with_key(&path, b'C');
        Segment::purge(&config).unwrap();
        Self { path, config }
    }

    fn notebox(&self, author: &str) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_notebox"));
        cmd.arg("--key-path")
            .arg(&self.path)
            .args(["--project-id", "C", "--author", author])
            .env_remove("RUST_LOG");
        cmd
    }

    fn run(&self, author: &str, args: &[&str]) -> Output {
        self.notebox(author).args(args).output().unwrap()
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        Segment::purge(&self.config).ok();
        std::fs::remove_file(&self.path).ok();
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn sole_one_shot_tears_the_board_down() {
    let scratch = Scratch::new("sole");

    let output = scratch.run("alice", &["add", "hello"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "Note 0 added.");

    assert!(!Segment::purge(&scratch.config).unwrap());
}

#[test]
fn one_shots_share_the_board_with_other_sessions() {
    let scratch = Scratch::new("shared");
    let anchor = Session::open(&scratch.config).unwrap();

    let output = scratch.run("bob", &["add", "from bob"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let notes = anchor.list().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].author, "bob");
    assert_eq!(notes[0].text, "from bob");

    let output = scratch.run("alice", &["delete", "0"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("belongs to another author"));
    assert_eq!(anchor.list().unwrap(), notes);

    let output = scratch.run("alice", &["edit", "7", "nothing here"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("no note at index 7"));

    let output = scratch.run("alice", &["list"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("[0] by bob at "));
    assert!(stdout(&output).contains("from bob"));

    let output = scratch.run("alice", &["list", "--mine"]);
    assert_eq!(stdout(&output).trim(), "No notes found.");

    let output = scratch.run("alice", &["status"]);
    assert!(stdout(&output).contains("Sessions:     2"));
    assert!(stdout(&output).contains("Notes:        1/20"));

    let output = scratch.run("bob", &["delete", "0"]);
    assert!(output.status.success());
    assert!(anchor.list().unwrap().is_empty());

    // Every one-shot left again.
    assert_eq!(anchor.stats().unwrap().sessions, 1);
    anchor.leave().unwrap();
}

#[test]
fn scripted_shell_session() {
    let scratch = Scratch::new("shell");
    let anchor = Session::open(&scratch.config).unwrap();
    let alice = Author::new("alice").unwrap();
    anchor
        .create(&alice, &NoteText::new("alice was here").unwrap())
        .unwrap();

    let mut child = scratch
        .notebox("carol")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"add carol too\nlist\ndelete 0\nmine\nquit\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let out = stdout(&output);
    assert!(out.contains("Note 1 added."));
    assert!(out.contains("alice was here"));
    assert!(out.contains("You can only delete your own notes."));
    assert!(out.contains("[1] by carol at "));

    assert_eq!(anchor.list().unwrap().len(), 2);
    assert_eq!(anchor.stats().unwrap().sessions, 1);
    anchor.leave().unwrap();
}

#[test]
fn terminated_shell_leaves_the_board() {
    let scratch = Scratch::new("sigterm");
    let anchor = Session::open(&scratch.config).unwrap();

    let mut child = scratch
        .notebox("dave")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    // Held open so the shell neither sees end of input nor a broken pipe.
    let _stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    // Handlers are installed before the greeting is printed.
    let mut greeting = String::new();
    stdout.read_line(&mut greeting).unwrap();
    assert!(greeting.starts_with("Posting as dave"));
    assert_eq!(anchor.stats().unwrap().sessions, 2);

    assert_eq!(unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) }, 0);
    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(128 + libc::SIGTERM));
    drop(stdout);

    assert_eq!(anchor.stats().unwrap().sessions, 1);
    anchor.leave().unwrap();
}

#[test]
fn signal_right_after_join_still_leaves() {
    const ROUNDS: usize = 25;
    let scratch = Scratch::new("join_signal");
    let anchor = Session::open(&scratch.config).unwrap();

    for round in 0..ROUNDS {
        let mut child = scratch
            .notebox("erin")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let _stdin = child.stdin.take().unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while anchor.stats().unwrap().sessions < 2 {
            assert!(Instant::now() < deadline, "round {round}: shell never joined");
            std::hint::spin_loop();
        }
        assert_eq!(unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) }, 0);

        let status = child.wait().unwrap();
        assert_eq!(status.code(), Some(128 + libc::SIGTERM), "round {round}");
        assert_eq!(anchor.stats().unwrap().sessions, 1, "round {round}");
    }
    anchor.leave().unwrap();
}

#[test]
fn purge_removes_an_orphaned_board() {
    let scratch = Scratch::new("purge");
    let orphan = Segment::acquire(&scratch.config).unwrap();

    let output = scratch.run("alice", &["purge"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "Board removed.");
    orphan.release();

    let output = scratch.run("alice", &["purge"]);
    assert_eq!(stdout(&output).trim(), "No board to remove.");
}
