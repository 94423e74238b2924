//! Terminal front-end: the interactive chat loop and plain-text rendering.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use uuid::Uuid;

use crate::error::TurnError;
use crate::notice::{Notice, Notifier};
use crate::orchestrator::RequestOrchestrator;
use crate::reveal::RevealSink;
use crate::session::{Session, SessionSummary};

const HELP: &str = "commands: /new  /sessions  /load ID  /delete ID  /rename TITLE  /history  /help  /quit";

/// Prints notices to stderr.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        let tag = if notice.is_failure() { "error" } else { "ok" };
        tracing::debug!(notice = notice.text(), "notify");
        eprintln!("[{}] {}", tag, notice.text());
    }
}

/// Writes each reveal frame's new suffix, so the answer appears to type itself.
pub struct TerminalSink<W: Write + Send> {
    out: W,
    shown: usize,
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, shown: 0 }
    }
}

impl<W: Write + Send> RevealSink for TerminalSink<W> {
    fn frame(&mut self, partial: &str) {
        let _ = self.out.write_all(partial[self.shown..].as_bytes());
        let _ = self.out.flush();
        self.shown = partial.len();
    }

    fn finish(&mut self, _full: &str) {
        let _ = writeln!(self.out);
        let _ = self.out.flush();
        self.shown = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Empty,
    Quit,
    Help,
    New,
    Sessions,
    History,
    Load(Uuid),
    Delete(Uuid),
    Rename(String),
    Prompt(String),
    Invalid(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ConsoleCommand::Empty;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return ConsoleCommand::Prompt(line.to_string());
        };
        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((n, a)) => (n, a.trim()),
            None => (command, ""),
        };
        let id = |arg: &str| {
            Uuid::parse_str(arg).map_err(|_| ConsoleCommand::Invalid(format!("invalid session id: '{}'", arg)))
        };
        match name {
            "quit" | "exit" => ConsoleCommand::Quit,
            "help" => ConsoleCommand::Help,
            "new" => ConsoleCommand::New,
            "sessions" => ConsoleCommand::Sessions,
            "history" => ConsoleCommand::History,
            "load" => id(arg).map(ConsoleCommand::Load).unwrap_or_else(|e| e),
            "delete" => id(arg).map(ConsoleCommand::Delete).unwrap_or_else(|e| e),
            "rename" if !arg.is_empty() => ConsoleCommand::Rename(arg.to_string()),
            "rename" => ConsoleCommand::Invalid("usage: /rename TITLE".into()),
            other => ConsoleCommand::Invalid(format!("unknown command '/{}'; {}", other, HELP)),
        }
    }
}

pub fn print_sessions(out: &mut impl Write, sessions: &[SessionSummary], current: Option<Uuid>) -> std::io::Result<()> {
    if sessions.is_empty() {
        return writeln!(out, "no sessions");
    }
    for s in sessions {
        let marker = if Some(s.id) == current { '*' } else { ' ' };
        writeln!(out, "{} {}  {}  {}", marker, s.id, s.created_at.format("%Y-%m-%d %H:%M"), s.title)?;
    }
    Ok(())
}

pub fn print_history(out: &mut impl Write, session: &Session) -> std::io::Result<()> {
    writeln!(out, "# {} ({} messages)", session.title, session.messages.len())?;
    if session.messages.is_empty() {
        return writeln!(out, "(no messages yet)");
    }
    for m in session.messages.as_slice() {
        writeln!(out, "[{}] {}: {}", m.id, m.role, m.content)?;
    }
    if session.messages.pending_user().is_some() {
        writeln!(out, "(last message has no answer)")?;
    }
    Ok(())
}

/// Reads lines from `input` until EOF or `/quit`, sending every non-command line as a turn.
pub async fn run_repl<R, W>(
    orch: &RequestOrchestrator,
    notifier: &dyn Notifier,
    input: R,
    mut out: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write + Send,
{
    let repo = orch.repository();
    let mut lines = input.lines();
    if let Some(current) = repo.current().await {
        print_history(&mut out, &current)?;
    }
    write!(out, "> ")?;
    out.flush()?;
    while let Some(line) = lines.next_line().await? {
        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Empty => {}
            ConsoleCommand::Help => writeln!(out, "{}", HELP)?,
            ConsoleCommand::New => {
                let session = repo.create().await?;
                tracing::debug!(session_id = %session.id, "switched to new session");
                notifier.notify(Notice::Success("New chat created".into()));
            }
            ConsoleCommand::Sessions => print_sessions(&mut out, &repo.list().await, repo.current_id().await)?,
            ConsoleCommand::History => match repo.current().await {
                Some(s) => print_history(&mut out, &s)?,
                None => writeln!(out, "no session selected")?,
            },
            ConsoleCommand::Load(id) => match repo.load(id).await {
                Ok(s) => print_history(&mut out, &s)?,
                Err(e) => writeln!(out, "{}", e)?,
            },
            ConsoleCommand::Delete(id) => {
                if repo.delete(id).await? {
                    notifier.notify(Notice::Success("Chat deleted".into()));
                } else {
                    writeln!(out, "no such session: {}", id)?;
                }
            }
            ConsoleCommand::Rename(title) => match repo.current_id().await {
                Some(id) => {
                    let s = repo.rename(id, &title).await?;
                    writeln!(out, "renamed to '{}'", s.title)?;
                }
                None => writeln!(out, "no session selected")?,
            },
            ConsoleCommand::Prompt(text) => {
                let result = {
                    let mut sink = TerminalSink::new(&mut out);
                    orch.submit(&text, &mut sink).await
                };
                match result {
                    Ok(_) | Err(TurnError::Validation(_)) => {}
                    Err(e) if e.is_not_sent() => writeln!(out, "(not sent: {})", e)?,
                    // Already surfaced through the notifier.
                    Err(e) => tracing::debug!(error = %e, "turn failed"),
                }
            }
            ConsoleCommand::Invalid(msg) => writeln!(out, "{}", msg)?,
        }
        write!(out, "> ")?;
        out.flush()?;
    }
    Ok(())
}
