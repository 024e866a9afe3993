//! [`ChatDriver`] – per-message orchestration.
//!
//! Wires the short-term window, the optional long-term store and the
//! text-generation collaborator together.  For every incoming message:
//!
//! 1. **Filter** – the bot's own messages and direct messages are ignored.
//! 2. **Observe** – a message that does not mention the bot is only recorded
//!    in short-term memory so later replies have context.
//! 3. **Recall** – on a mention, the last `short_term_max_context` turns are
//!    rendered and, when long-term memory is enabled, the `long_term_top_k`
//!    most relevant memories are retrieved.
//! 4. **Generate** – the composed prompt is sent to the [`TextGenerator`].
//!    An empty reply becomes `"..."`.
//! 5. **Remember** – the user message and the reply are appended to
//!    short-term memory and the exchange is written to long-term memory.
//!
//! Any failure is logged and answered with [`FALLBACK_REPLY`].  Nothing is
//! rolled back: if the long-term write fails after the reply was produced,
//! both the reply and the apology are sent.
//!
//! # Ordering
//!
//! Each message takes a turn ticket for its channel the moment it arrives.
//! Recall and generation run immediately, so two mentions in one channel can
//! wait on the model at the same time, but a turn only touches the channel's
//! history (and long-term memory) once every earlier ticket of that channel
//! has been released.  Histories therefore grow in arrival order.  A mention
//! sees the context that was applied when it arrived; replies still in
//! flight are not part of it.  Different channels never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use persona_memory::long_term::{LongTermConfig, LongTermStats, LongTermStore};
use persona_memory::short_term::{DEFAULT_WINDOW_SIZE, ShortTermStats, ShortTermStore};
use persona_memory::summarizer::{ConversationSummarizer, DEFAULT_MAX_LENGTH};
use persona_types::{ChannelId, Metadata, PersonaError, TIMESTAMP_KEY};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::generator::{SamplingParams, TextGenerator, clean_response};
use crate::prompt::{DEFAULT_PERSONA, build_prompt};

/// Sent when a turn fails anywhere after the bot was mentioned.
pub const FALLBACK_REPLY: &str = "sorry, something went wrong lol";

/// Sent when the model produces nothing but whitespace.
pub const EMPTY_REPLY: &str = "...";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`ChatDriver`].
#[derive(Clone)]
pub struct ChatDriverConfig {
    /// Turns retained per channel in short-term memory.
    pub short_term_window: usize,
    /// Turns rendered into the prompt on a mention.
    pub short_term_max_context: usize,
    /// Whether the long-term store is opened at [`ChatDriver::start`].
    pub enable_long_term: bool,
    pub long_term: LongTermConfig,
    /// Memories recalled per mention.
    pub long_term_top_k: usize,
    pub sampling: SamplingParams,
    /// User id of the bot itself; its own messages are ignored.
    pub bot_user_id: u64,
    /// Display name recorded as the author of the bot's replies.
    pub bot_name: String,
    pub persona: String,
}

impl Default for ChatDriverConfig {
    fn default() -> Self {
        Self {
            short_term_window: DEFAULT_WINDOW_SIZE,
            short_term_max_context: 10,
            enable_long_term: false,
            long_term: LongTermConfig::default(),
            long_term_top_k: 3,
            sampling: SamplingParams::default(),
            bot_user_id: 0,
            bot_name: "sususbot".to_string(),
            persona: DEFAULT_PERSONA.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message shapes
// ─────────────────────────────────────────────────────────────────────────────

/// A message delivered by the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub author_id: u64,
    pub author_name: String,
    pub content: String,
    pub channel_id: ChannelId,
    pub channel_name: String,
    /// `None` for direct messages.
    pub guild: Option<String>,
    pub mentions_bot: bool,
    pub created_at: DateTime<Utc>,
}

/// Combined memory status of a [`ChatDriver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverStats {
    pub short_term: ShortTermStats,
    /// `None` when long-term memory is disabled.
    pub long_term: Option<LongTermStats>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ChatDriver
// ─────────────────────────────────────────────────────────────────────────────

/// The chat-turn orchestrator.
pub struct ChatDriver {
    config: ChatDriverConfig,
    short_term: ShortTermStore,
    long_term: Option<Arc<LongTermStore>>,
    generator: Arc<dyn TextGenerator>,
    summarizer: Option<ConversationSummarizer>,
    /// Completion signal of the latest turn taken per channel.
    channel_tails: Mutex<HashMap<ChannelId, oneshot::Receiver<()>>>,
}

/// A turn's place in its channel's queue.  Dropping it releases the next turn.
struct TurnTicket {
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl TurnTicket {
    /// Wait until every earlier turn of the channel has finished.
    async fn wait(&mut self) {
        if let Some(previous) = self.previous.take() {
            // A dropped sender means the earlier turn is over either way.
            let _ = previous.await;
        }
    }
}

impl ChatDriver {
    /// Build a driver.  Long-term memory, if enabled, stays uninitialised
    /// until [`start`](Self::start).
    pub fn new(config: ChatDriverConfig, generator: Arc<dyn TextGenerator>) -> Self {
        let short_term = ShortTermStore::new(config.short_term_window);
        let long_term = config
            .enable_long_term
            .then(|| Arc::new(LongTermStore::new(config.long_term.clone())));
        Self {
            config,
            short_term,
            long_term,
            generator,
            summarizer: None,
            channel_tails: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a summarizer used by [`summarize_channel`](Self::summarize_channel).
    pub fn with_summarizer(mut self, summarizer: ConversationSummarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Initialise long-term memory when enabled.
    ///
    /// A failure to open the store does not abort the bot: it is logged and
    /// long-term memory is disabled for the rest of the process.
    pub async fn start(&mut self) {
        let Some(long_term) = self.long_term.clone() else {
            info!("long-term memory disabled");
            return;
        };
        info!("initializing long-term memory");
        match long_term.initialize().await {
            Ok(()) => info!("long-term memory ready"),
            Err(e) => {
                error!(error = %e, "long-term memory unavailable; continuing without it");
                self.long_term = None;
            }
        }
    }

    pub fn short_term(&self) -> &ShortTermStore {
        &self.short_term
    }

    /// The long-term store, or `None` when disabled.
    pub fn long_term(&self) -> Option<&LongTermStore> {
        self.long_term.as_deref()
    }

    pub async fn stats(&self) -> DriverStats {
        let long_term = match &self.long_term {
            Some(lt) => Some(lt.get_stats().await),
            None => None,
        };
        DriverStats {
            short_term: self.short_term.get_stats(),
            long_term,
        }
    }

    /// Process one incoming message and return the texts to send back, in
    /// order.  An empty vector means the bot stays silent.
    pub async fn handle_message(&self, msg: IncomingMessage) -> Vec<String> {
        if msg.author_id == self.config.bot_user_id {
            return Vec::new();
        }
        if msg.guild.is_none() {
            return Vec::new();
        }

        let mut ticket = self.take_ticket(msg.channel_id);
        let span = info_span!("chat_turn", turn_id = %Uuid::new_v4(), channel_id = msg.channel_id);
        async {
            if !msg.mentions_bot {
                ticket.wait().await;
                self.short_term.add_message(&msg.author_name, &msg.content, msg.channel_id);
                return Vec::new();
            }

            info!(channel = %msg.channel_name, author = %msg.author_name, "mentioned");
            self.respond(&msg, &mut ticket).await
        }
        .instrument(span)
        .await
    }

    /// Summarize the recent turns of `channel_id`, or `None` when no
    /// summarizer is attached.
    pub async fn summarize_channel(&self, channel_id: ChannelId) -> Option<String> {
        let summarizer = self.summarizer.as_ref()?;
        let turns = self.short_term.get_recent_messages(channel_id, self.config.short_term_window);
        Some(summarizer.summarize_conversation(&turns, DEFAULT_MAX_LENGTH).await)
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    async fn respond(&self, msg: &IncomingMessage, ticket: &mut TurnTicket) -> Vec<String> {
        let outcome = self.generate_reply(msg).await;
        ticket.wait().await;

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "error generating response");
                return vec![FALLBACK_REPLY.to_string()];
            }
        };

        self.short_term.add_message(&msg.author_name, &msg.content, msg.channel_id);
        self.short_term.add_message(&self.config.bot_name, &reply, msg.channel_id);

        if let Err(e) = self.remember(msg, &reply).await {
            error!(error = %e, "failed to store exchange in long-term memory");
            return vec![reply, FALLBACK_REPLY.to_string()];
        }

        info!(channel = %msg.channel_name, "response produced");
        vec![reply]
    }

    async fn generate_reply(&self, msg: &IncomingMessage) -> Result<String, PersonaError> {
        let context = self
            .short_term
            .get_context(msg.channel_id, Some(self.config.short_term_max_context));

        let long_term_context = match &self.long_term {
            Some(lt) => lt
                .retrieve(&msg.content, self.config.long_term_top_k, None)
                .await?
                .join("\n"),
            None => String::new(),
        };

        let prompt = build_prompt(&self.config.persona, &context, &long_term_context);
        debug!(prompt_chars = prompt.len(), "prompt composed");

        let raw = self.generator.generate(&prompt, &self.config.sampling).await?;
        let reply = clean_response(&raw);
        if reply.is_empty() {
            warn!("model returned an empty reply");
            return Ok(EMPTY_REPLY.to_string());
        }
        Ok(reply)
    }

    async fn remember(&self, msg: &IncomingMessage, reply: &str) -> Result<(), PersonaError> {
        let Some(lt) = &self.long_term else {
            return Ok(());
        };
        let content = format!(
            "{}: {}\n{}: {}",
            msg.author_name, msg.content, self.config.bot_name, reply
        );
        let mut metadata = Metadata::new();
        metadata.insert("channel".to_string(), msg.channel_name.clone());
        metadata.insert("guild".to_string(), msg.guild.clone().unwrap_or_default());
        // Replaced by the store's write time.
        metadata.insert(TIMESTAMP_KEY.to_string(), msg.created_at.to_rfc3339());
        lt.add_memory(&content, Some(metadata)).await?;
        Ok(())
    }

    fn take_ticket(&self, channel_id: ChannelId) -> TurnTicket {
        let (done, tail) = oneshot::channel();
        let mut tails = self.channel_tails.lock().unwrap_or_else(PoisonError::into_inner);
        TurnTicket {
            previous: tails.insert(channel_id, tail),
            _done: done,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
