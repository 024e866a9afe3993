//! REPL – a local stand-in for a Discord guild.
//!
//! Every line typed is delivered to the [`ChatDriver`] as a guild message
//! from the current speaker in the current channel.  Mentioning the bot
//! (`@<bot_name>` anywhere in the line) asks it for a reply.
//!
//! Supported slash-commands:
//!   /help               – show this list
//!   /channel <id> [name] – switch channel
//!   /as <name>          – switch speaker
//!   /stats              – memory statistics (JSON)
//!   /memories [n]       – most recent long-term memories
//!   /summary            – summarize the current channel
//!   /clear              – forget the current channel's short-term history
//!   /clear-all          – forget everything, both memory layers
//!   /models             – list models served by Ollama
//!   /quit | /exit       – leave

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Runtime;
use tracing::warn;

use persona_runtime::{ChatDriver, IncomingMessage};
use persona_types::ChannelId;

use crate::config::Config;
use crate::ollama;

const DEFAULT_MEMORY_COUNT: usize = 5;
const GUILD_NAME: &str = "local";

/// A parsed REPL input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Channel { id: ChannelId, name: Option<String> },
    As(String),
    Stats,
    Memories(usize),
    Summary,
    Clear,
    ClearAll,
    Models,
    Quit,
    /// Plain chat text.
    Say(String),
    /// A slash-command that could not be parsed; carries the reason.
    Invalid(String),
}

/// Parse one trimmed, non-empty input line.
pub fn parse_command(line: &str) -> Command {
    if !line.starts_with('/') {
        return Command::Say(line.to_string());
    }
    let mut parts = line.split_whitespace();
    let head = parts.next().unwrap_or_default();
    let rest: Vec<&str> = parts.collect();

    match head {
        "/help" => Command::Help,
        "/channel" => match rest.first().map(|id| id.parse::<ChannelId>()) {
            Some(Ok(id)) => {
                let name = (rest.len() > 1).then(|| rest[1..].join(" "));
                Command::Channel { id, name }
            }
            Some(Err(_)) => Command::Invalid(format!("'{}' is not a channel id", rest[0])),
            None => Command::Invalid("usage: /channel <id> [name]".to_string()),
        },
        "/as" if !rest.is_empty() => Command::As(rest.join(" ")),
        "/as" => Command::Invalid("usage: /as <name>".to_string()),
        "/stats" => Command::Stats,
        "/memories" => match rest.first() {
            None => Command::Memories(DEFAULT_MEMORY_COUNT),
            Some(n) => match n.parse::<usize>() {
                Ok(n) => Command::Memories(n),
                Err(_) => Command::Invalid(format!("'{}' is not a count", n)),
            },
        },
        "/summary" => Command::Summary,
        "/clear" => Command::Clear,
        "/clear-all" => Command::ClearAll,
        "/models" => Command::Models,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Invalid(format!("unknown command '{}'", other)),
    }
}

/// Whether `content` mentions the bot as `@<bot_name>` (case-insensitive).
pub fn mentions(content: &str, bot_name: &str) -> bool {
    content
        .to_lowercase()
        .contains(&format!("@{}", bot_name.to_lowercase()))
}

/// Who is speaking where.
struct Session {
    channel_id: ChannelId,
    channel_name: String,
    speaker: String,
    /// Stable per-name author ids; the bot owns id 0.
    author_ids: HashMap<String, u64>,
}

impl Session {
    fn author_id(&mut self, name: &str) -> u64 {
        let next = self.author_ids.len() as u64 + 1;
        *self.author_ids.entry(name.to_string()).or_insert(next)
    }

    fn prompt(&self) -> String {
        format!("#{} {}> ", self.channel_name, self.speaker)
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(shutdown: Arc<AtomicBool>, cfg: &Config, driver: &ChatDriver, rt: &Runtime) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };

    let mut session = Session {
        channel_id: 1,
        channel_name: "general".to_string(),
        speaker: "you".to_string(),
        author_ids: HashMap::new(),
    };

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline(&session.prompt()) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = editor.add_history_entry(line) {
            warn!(error = %e, "failed to record history entry");
        }

        match parse_command(line) {
            Command::Help => cmd_help(),
            Command::Channel { id, name } => {
                session.channel_id = id;
                session.channel_name = name.unwrap_or_else(|| format!("channel-{id}"));
                println!("  Now in {}", format!("#{}", session.channel_name).bold());
            }
            Command::As(name) => {
                session.speaker = name;
                println!("  Speaking as {}", session.speaker.bold());
            }
            Command::Stats => cmd_stats(driver, rt),
            Command::Memories(n) => cmd_memories(driver, rt, n),
            Command::Summary => cmd_summary(driver, rt, session.channel_id),
            Command::Clear => {
                driver.short_term().clear_channel(session.channel_id);
                println!("{}", "✓ Channel history cleared.".green());
            }
            Command::ClearAll => cmd_clear_all(driver, rt, &mut editor),
            Command::Models => cmd_models(cfg),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Invalid(reason) => {
                println!(
                    "{} {}. Type {} for available commands.",
                    "Error:".red(),
                    reason.yellow(),
                    "/help".bold()
                );
            }
            Command::Say(content) => {
                let author_name = session.speaker.clone();
                let msg = IncomingMessage {
                    author_id: session.author_id(&author_name),
                    author_name,
                    mentions_bot: mentions(&content, &cfg.bot_name),
                    content,
                    channel_id: session.channel_id,
                    channel_name: session.channel_name.clone(),
                    guild: Some(GUILD_NAME.to_string()),
                    created_at: chrono::Utc::now(),
                };
                for reply in rt.block_on(driver.handle_message(msg)) {
                    println!("{} {}", format!("{}:", cfg.bot_name).bold().magenta(), reply);
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Persona Commands".bold().underline());
    println!("  {}  – switch channel", "/channel <id> [name]".bold().cyan());
    println!("  {}             – switch speaker", "/as <name>".bold().cyan());
    println!("  {}                – memory statistics", "/stats".bold().cyan());
    println!("  {}         – recent long-term memories", "/memories [n]".bold().cyan());
    println!("  {}              – summarize this channel", "/summary".bold().cyan());
    println!("  {}                – forget this channel", "/clear".bold().cyan());
    println!("  {}            – forget everything", "/clear-all".bold().cyan());
    println!("  {}               – models served by Ollama", "/models".bold().cyan());
    println!("  {}         – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
    println!("  Anything else is sent as a chat message; include @<bot> to get a reply.");
    println!();
}

fn cmd_stats(driver: &ChatDriver, rt: &Runtime) {
    let stats = rt.block_on(driver.stats());
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{}: {}", "Error rendering stats".red(), e),
    }
}

fn cmd_memories(driver: &ChatDriver, rt: &Runtime, count: usize) {
    let Some(long_term) = driver.long_term() else {
        println!("  {}", "Long-term memory is disabled.".dimmed());
        return;
    };
    match rt.block_on(long_term.get_recent_memories(count)) {
        Ok(memories) if memories.is_empty() => println!("  {}", "No memories yet.".dimmed()),
        Ok(memories) => {
            for (i, memory) in memories.iter().enumerate() {
                let channel = memory.metadata.get("channel").map(String::as_str).unwrap_or("?");
                println!("  {} {} {}", format!("{:>2}.", i + 1).dimmed(), format!("#{channel}").cyan(), memory.content);
            }
        }
        Err(e) => println!("{}: {}", "Error reading memories".red(), e),
    }
}

fn cmd_summary(driver: &ChatDriver, rt: &Runtime, channel_id: ChannelId) {
    match rt.block_on(driver.summarize_channel(channel_id)) {
        Some(summary) if summary.is_empty() => println!("  {}", "Nothing to summarize.".dimmed()),
        Some(summary) => println!("  {}", summary),
        None => println!("  {}", "No summarizer attached.".dimmed()),
    }
}

fn cmd_clear_all(driver: &ChatDriver, rt: &Runtime, editor: &mut DefaultEditor) {
    let answer = editor
        .readline("  Forget all channels and all long-term memories? [y/N]: ")
        .unwrap_or_default();
    if !answer.trim().eq_ignore_ascii_case("y") {
        println!("  Cancelled.");
        return;
    }

    driver.short_term().clear_all();
    if let Some(long_term) = driver.long_term()
        && let Err(e) = rt.block_on(long_term.clear_all())
    {
        println!("{}: {}", "Error clearing long-term memory".red(), e);
        return;
    }
    println!("{}", "✓ All memory cleared.".green());
}

fn cmd_models(cfg: &Config) {
    println!("{}", "Ollama Models".bold().underline());
    println!("  Persona model : {}", cfg.active_model.yellow());
    match ollama::fetch_models(&cfg.ollama_url) {
        Ok(models) if models.is_empty() => println!("  {}", "no models found".yellow()),
        Ok(models) => {
            for m in &models {
                let active = ollama::has_model(std::slice::from_ref(m), &cfg.active_model);
                let marker = if active { "▶" } else { " " };
                println!("    {} {} {}", marker.green(), m.name.bold(), ollama::format_size(m.size).dimmed());
            }
        }
        Err(e) => {
            println!("  {}", "offline".red());
            println!("  {}", e.dimmed());
        }
    }
}
