//! `persona-cli` – talk to the persona bot from a terminal.
//!
//! This binary wires the full chat pipeline up to a local REPL instead of a
//! Discord gateway.  It:
//!
//! 1. Checks for `~/.persona/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Probes the local Ollama instance and warns when the persona model is
//!    not being served.
//! 3. Builds the [`ChatDriver`] (short-term memory, optional long-term
//!    memory, Ollama generator and summarizer).
//! 4. Drops the user into an **interactive REPL** where every line is a
//!    guild message (see [`repl`]).
//! 5. Intercepts **Ctrl-C** to flush telemetry and exit cleanly.

mod config;
mod ollama;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use persona_memory::summarizer::ConversationSummarizer;
use persona_runtime::telemetry::init_tracing;
use persona_runtime::{ChatDriver, OllamaGenerator};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); PERSONA_LOG_FORMAT=json switches to
    // newline-delimited JSON.  User-facing output still goes through println!.
    let _telemetry = init_tracing("persona-cli");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Ollama discovery ──────────────────────────────────────────────────
    print!("\n  Probing Ollama at {} … ", cfg.ollama_url.dimmed());
    match ollama::fetch_models(&cfg.ollama_url) {
        Ok(models) => {
            println!("{} ({} model(s) available)", "online".green(), models.len());
            if !ollama::has_model(&models, &cfg.active_model) {
                println!(
                    "  {} persona model '{}' is not available; replies will fail until it is created.",
                    "Warning:".yellow(),
                    cfg.active_model.bold()
                );
            }
        }
        Err(_) => {
            println!("{}", "offline".yellow());
            println!(
                "  {}  Run `{}` to serve the persona model.",
                "No Ollama instance detected.".dimmed(),
                "ollama serve".bold()
            );
        }
    }

    // ── Chat driver ───────────────────────────────────────────────────────
    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            return;
        }
    };

    let generator = Arc::new(OllamaGenerator::new(&cfg.ollama_url, &cfg.active_model));
    let mut driver = ChatDriver::new(cfg.driver_config(), generator.clone())
        .with_summarizer(ConversationSummarizer::new(generator));
    rt.block_on(driver.start());

    let long_term = if driver.long_term().is_some() {
        cfg.long_term_db_path.green().to_string()
    } else {
        "disabled".dimmed().to_string()
    };
    info!(model = %cfg.active_model, long_term_enabled = driver.long_term().is_some(), "chat driver ready");
    if driver.long_term().is_some() {
        println!("  Long-term memory: {} (embedder: {})", long_term, cfg.embedder.to_string().cyan());
    } else {
        println!("  Long-term memory: {}", long_term);
    }
    println!();
    println!(
        "  Type {} for a list of commands; mention {} to get a reply.\n",
        "/help".bold().cyan(),
        format!("@{}", cfg.bot_name).bold().magenta()
    );

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(shutdown, &cfg, &driver, &rt);
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Persona First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set things up.\n");

    let mut cfg = config::Config::default();

    cfg.active_model = prompt_line(&format!("  Persona model [{}]: ", cfg.active_model), &cfg.active_model);
    cfg.bot_name = prompt_line(&format!("  Bot name [{}]: ", cfg.bot_name), &cfg.bot_name);

    let enable = prompt_line("  Enable long-term memory? [y/N]: ", "n");
    cfg.enable_long_term_memory = enable.eq_ignore_ascii_case("y");
    if cfg.enable_long_term_memory {
        println!("  Which embedder should index memories?");
        println!("    1) Local feature hashing  (default, no server needed)");
        println!("    2) Ollama embeddings");
        cfg.embedder = match prompt_line("  Enter choice [1]: ", "1").as_str() {
            "2" => config::EmbedderKind::Ollama,
            _ => config::EmbedderKind::Hashing,
        };
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("  {} {}", "Persona".bold().magenta(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  A chat bot that talks like your friends do");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
