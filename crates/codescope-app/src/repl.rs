//! Interactive terminal session.
//!
//! Lines starting with `/` are commands; anything else is submitted to the
//! dispatcher in the current mode. Streamed answers are printed by a
//! separate task that follows `ConversationUpdated` events.

use std::io::Write;
use std::str::FromStr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use codescope_chat::{AppState, ChatError, IgnoredReason, SubmitOutcome};
use codescope_client::Backend;
use codescope_core::events::EngineEvent;
use codescope_core::types::{Conversation, FileKind, FileNode, QueryMode, Role};
use codescope_export::ExportFormat;

const HELP: &str = "\
Commands:
  /help                       show this help
  /mode <semantic|exact|fuzzy>  switch query mode
  /threshold <0-100>          similarity threshold for fuzzy search
  /repo <path>                open (index) a repository
  /new                        start a new conversation
  /list                       list conversations, most recent first
  /switch <id>                make a conversation active
  /rename <id> <title>        rename a conversation
  /delete <id>                delete a conversation
  /find <text>                search conversation titles and messages
  /export <md|json|pdf> [id]  export the active (or given) conversation
  /ls [path]                  list the repository root or a directory
  /cat <path>                 print a remote file
  /health                     check the backend
  /quit                       exit
Anything else is sent as a query in the current mode.";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Mode(QueryMode),
    Threshold(u8),
    Repo(String),
    New,
    List,
    Switch(String),
    Rename { id: String, title: String },
    Delete(String),
    Find(String),
    Export {
        format: ExportFormat,
        id: Option<String>,
    },
    Ls(Option<String>),
    Cat(String),
    Health,
    Quit,
    Query(String),
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Command::Query(line.to_string()));
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        match name {
            "help" | "?" => Ok(Command::Help),
            "mode" => args
                .parse::<QueryMode>()
                .map(Command::Mode)
                .map_err(|_| "usage: /mode <semantic|exact|fuzzy>".to_string()),
            "threshold" => match args.parse::<u16>() {
                Ok(t) if t <= 100 => Ok(Command::Threshold(t as u8)),
                _ => Err("usage: /threshold <0-100>".to_string()),
            },
            "repo" => required(args, "usage: /repo <path>").map(Command::Repo),
            "new" => Ok(Command::New),
            "list" => Ok(Command::List),
            "switch" => required(args, "usage: /switch <id>").map(Command::Switch),
            "rename" => match args.split_once(char::is_whitespace) {
                Some((id, title)) if !title.trim().is_empty() => Ok(Command::Rename {
                    id: id.to_string(),
                    title: title.trim().to_string(),
                }),
                _ => Err("usage: /rename <id> <title>".to_string()),
            },
            "delete" => required(args, "usage: /delete <id>").map(Command::Delete),
            "find" => Ok(Command::Find(args.to_string())),
            "export" => {
                let mut parts = args.split_whitespace();
                let format = parts
                    .next()
                    .and_then(|f| f.parse::<ExportFormat>().ok())
                    .ok_or_else(|| "usage: /export <md|json|pdf> [id]".to_string())?;
                Ok(Command::Export {
                    format,
                    id: parts.next().map(str::to_string),
                })
            }
            "ls" => Ok(Command::Ls((!args.is_empty()).then(|| args.to_string()))),
            "cat" => required(args, "usage: /cat <path>").map(Command::Cat),
            "health" => Ok(Command::Health),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(format!("unknown command: /{} (try /help)", other)),
        }
    }
}

fn required(args: &str, usage: &str) -> Result<String, String> {
    if args.is_empty() {
        Err(usage.to_string())
    } else {
        Ok(args.to_string())
    }
}

/// Tracks how much of the streaming answer has been printed.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    conversation_id: Option<String>,
    printed: usize,
}

impl StreamPrinter {
    pub fn start(&mut self, conversation_id: &str) {
        self.conversation_id = Some(conversation_id.to_string());
        self.printed = 0;
    }

    pub fn finish(&mut self) {
        self.conversation_id = None;
        self.printed = 0;
    }

    /// Text of the answer not printed yet, if this snapshot belongs to the
    /// answer being streamed.
    pub fn delta(&mut self, conversation: &Conversation) -> Option<String> {
        if self.conversation_id.as_deref() != Some(conversation.id.as_str()) {
            return None;
        }
        let last = conversation.messages.last()?;
        if last.role != Role::Assistant {
            return None;
        }
        let delta = last.content.get(self.printed..)?;
        if delta.is_empty() {
            return None;
        }
        self.printed = last.content.len();
        Some(delta.to_string())
    }
}

fn spawn_printer(state: &AppState) -> tokio::task::JoinHandle<()> {
    let mut rx = state.subscribe();
    tokio::spawn(async move {
        let mut printer = StreamPrinter::default();
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Printer lagged behind engine events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                EngineEvent::AnswerStarted { conversation_id } => printer.start(&conversation_id),
                EngineEvent::ConversationUpdated { conversation } => {
                    if let Some(delta) = printer.delta(&conversation) {
                        print!("{}", delta);
                        let _ = std::io::stdout().flush();
                    }
                }
                EngineEvent::AnswerFinished { .. } => {
                    printer.finish();
                    println!();
                }
                EngineEvent::RepositoryIndexing { progress, .. } => println!("  {}", progress),
                other => debug!(event = other.event_name(), "Engine event"),
            }
        }
    })
}

/// Run the session until `/quit` or end of input.
pub async fn run(state: AppState) -> std::io::Result<()> {
    let printer = spawn_printer(&state);
    println!(
        "CodeScope v{} (mode: {}). Type /help for commands.",
        env!("CARGO_PKG_VERSION"),
        state.dispatcher().mode()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}> ", state.dispatcher().mode());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => {
                if let Err(e) = execute(&state, command).await {
                    println!("error: {}", e);
                }
            }
            Err(usage) => println!("{}", usage),
        }
    }

    printer.abort();
    Ok(())
}

async fn execute(state: &AppState, command: Command) -> Result<(), ChatError> {
    match command {
        Command::Help => println!("{}", HELP),
        Command::Mode(mode) => {
            state.dispatcher().set_mode(mode);
            println!("mode: {}", mode);
        }
        Command::Threshold(t) => {
            let t = state.dispatcher().set_fuzzy_threshold(t);
            println!("fuzzy threshold: {}", t);
        }
        Command::Repo(path) => {
            let summary = state.open_repository(&path).await?;
            println!("{}", summary.message);
            if let (Some(files), Some(chunks)) = (summary.files_count, summary.chunks_count) {
                println!("{} files, {} chunks indexed", files, chunks);
            }
        }
        Command::New => {
            let conversation = state.new_conversation()?;
            println!("new conversation {}", conversation.id);
        }
        Command::List => print_conversations(state, &state.list_conversations()?)?,
        Command::Find(query) => print_conversations(state, &state.search_conversations(&query)?)?,
        Command::Switch(id) => {
            let conversation = state.switch_conversation(&id)?;
            println!("switched to \"{}\"", conversation.title);
            for message in &conversation.messages {
                println!("[{}] {}", message.role.label(), message.content);
            }
        }
        Command::Rename { id, title } => {
            let conversation = state.rename_conversation(&id, &title)?;
            println!("renamed to \"{}\"", conversation.title);
        }
        Command::Delete(id) => {
            state.delete_conversation(&id)?;
            println!("deleted {}", id);
        }
        Command::Export { format, id } => {
            let path = state.export_conversation(id.as_deref(), format)?;
            println!("saved {}", path.display());
        }
        Command::Ls(path) => {
            let nodes = match path {
                Some(path) => state.browser().list(&path).await?,
                None => {
                    let repo = state.dispatcher().repository().ok_or(ChatError::NoRepository)?;
                    state.browser().list(&repo).await?
                }
            };
            print_nodes(&nodes);
        }
        Command::Cat(path) => println!("{}", state.browser().read(&path).await?),
        Command::Health => {
            let health = state.backend().health().await?;
            println!("{} {} ({})", health.service, health.version, health.status);
        }
        Command::Query(query) => submit(state, &query).await?,
        Command::Quit => {}
    }
    Ok(())
}

async fn submit(state: &AppState, query: &str) -> Result<(), ChatError> {
    match state.dispatcher().submit(query).await? {
        SubmitOutcome::Ignored(IgnoredReason::Busy) => println!("still working on the last query"),
        SubmitOutcome::Ignored(IgnoredReason::EmptyQuery) => {}
        SubmitOutcome::Answered {
            save_error: Some(e),
            ..
        } => println!("warning: the answer could not be saved: {}", e),
        SubmitOutcome::Answered { .. } => {}
        SubmitOutcome::Searched { mode, total_matches } => {
            let set = state.dispatcher().search_results();
            if set.is_empty() {
                println!("{}", mode.empty_state_hint());
                return Ok(());
            }
            let context = state.config.search.context_lines;
            for result in &set.results {
                println!("{}:{}", result.file, result.line_number);
                let before = result.context_before.len().saturating_sub(context);
                for line in &result.context_before[before..] {
                    println!("    {}", line);
                }
                println!("  > {}", result.line_content);
                for line in result.context_after.iter().take(context) {
                    println!("    {}", line);
                }
            }
            println!("{} matches ({} shown)", total_matches, set.results.len());
        }
    }
    Ok(())
}

fn print_conversations(state: &AppState, conversations: &[Conversation]) -> Result<(), ChatError> {
    if conversations.is_empty() {
        println!("no conversations");
        return Ok(());
    }
    let active = state.store().active_id()?;
    for c in conversations {
        let marker = if active.as_deref() == Some(c.id.as_str()) { "*" } else { " " };
        println!(
            "{} {}  {}  ({})",
            marker,
            c.id,
            c.title,
            c.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn print_nodes(nodes: &[FileNode]) {
    for node in nodes {
        match node.kind {
            FileKind::Directory => println!("  {}/", node.name),
            FileKind::File => println!("  {}", node.name),
        }
    }
}
