// Context assembly
//
// Builds the ordered, bounded list of messages sent to the LLM for one event:
//
//   [system instructions] [thread parent] [thread history, oldest first] trigger
//
// Thread history is filtered (third-party bots, empty text) and then truncated
// to the most recent `max_messages` entries. The parent is never truncated and
// the trigger is always last.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::BotConfig;
use crate::event::{compare_ts, BotIdentity, HistoryMessage, IncomingEvent};
use crate::llm::{LlmMessage, LlmMessageRole};

/// What an assembler keeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPolicy {
    /// Thread-history budget; negative keeps everything
    pub max_messages: i64,
    /// Keep messages from bots other than this one
    pub include_other_bots: bool,
    /// Keep the bot's own prior replies
    pub retain_own_messages: bool,
    /// The bot itself, for role tagging and mention stripping
    pub identity: BotIdentity,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self {
            max_messages: -1,
            include_other_bots: false,
            retain_own_messages: true,
            identity: BotIdentity::default(),
        }
    }
}

impl ContextPolicy {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            max_messages: config.max_history_messages,
            include_other_bots: config.include_other_bots,
            retain_own_messages: config.retain_own_messages,
            identity: config.identity.clone(),
        }
    }

    pub fn with_max_messages(mut self, max: i64) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_include_other_bots(mut self, include: bool) -> Self {
        self.include_other_bots = include;
        self
    }

    pub fn with_identity(mut self, identity: BotIdentity) -> Self {
        self.identity = identity;
        self
    }

    fn admits(&self, author_id: &str, author_is_bot: bool, bot_id: Option<&str>) -> bool {
        if self.identity.is_self(author_id, bot_id) {
            self.retain_own_messages
        } else if author_is_bot {
            self.include_other_bots
        } else {
            true
        }
    }

    fn role_for(&self, author_id: &str, bot_id: Option<&str>) -> LlmMessageRole {
        if self.identity.is_self(author_id, bot_id) {
            LlmMessageRole::Assistant
        } else {
            LlmMessageRole::User
        }
    }
}

/// Where a context entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Instructions,
    Parent,
    History,
    Trigger,
}

/// A role-tagged entry of the context window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub role: LlmMessageRole,
    pub content: String,
    pub source: EntrySource,
}

/// The ordered message list sent to the LLM for one event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub entries: Vec<ContextEntry>,
}

impl ContextWindow {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of thread-history entries (excludes instructions, parent, trigger)
    pub fn history_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.source == EntrySource::History)
            .count()
    }

    pub fn last(&self) -> Option<&ContextEntry> {
        self.entries.last()
    }

    pub fn has_parent(&self) -> bool {
        self.entries.iter().any(|e| e.source == EntrySource::Parent)
    }

    pub fn into_llm_messages(self) -> Vec<LlmMessage> {
        self.entries
            .into_iter()
            .map(|e| LlmMessage::new(e.role, e.content))
            .collect()
    }
}

/// Builds context windows under a fixed policy
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    policy: ContextPolicy,
}

impl ContextAssembler {
    pub fn new(policy: ContextPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ContextPolicy {
        &self.policy
    }

    /// Assemble the window for `event`.
    ///
    /// `thread_history` may be in any order and may contain the parent or the
    /// event itself; both are removed before truncation.
    pub fn assemble(
        &self,
        system_instructions: &str,
        parent: Option<&HistoryMessage>,
        thread_history: &[HistoryMessage],
        event: &IncomingEvent,
    ) -> ContextWindow {
        let mut excluded: HashSet<&str> = HashSet::new();
        excluded.insert(event.message_ts.as_str());
        if let Some(p) = parent {
            excluded.insert(p.ts.as_str());
        }

        let mut history: Vec<&HistoryMessage> = thread_history
            .iter()
            .filter(|m| !excluded.contains(m.ts.as_str()))
            .filter(|m| self.policy.admits(&m.author_id, m.author_is_bot, m.bot_id.as_deref()))
            .collect();
        history.sort_by(|a, b| compare_ts(&a.ts, &b.ts));

        let mut history_entries: Vec<ContextEntry> = history
            .into_iter()
            .filter_map(|m| self.history_entry(m, EntrySource::History))
            .collect();

        if self.policy.max_messages >= 0 {
            let keep = self.policy.max_messages as usize;
            if history_entries.len() > keep {
                history_entries.drain(..history_entries.len() - keep);
            }
        }

        let mut entries = Vec::with_capacity(history_entries.len() + 3);

        let instructions = system_instructions.trim();
        if !instructions.is_empty() {
            entries.push(ContextEntry {
                role: LlmMessageRole::System,
                content: instructions.to_string(),
                source: EntrySource::Instructions,
            });
        }

        if let Some(p) = parent.filter(|p| {
            self.policy
                .admits(&p.author_id, p.author_is_bot, p.bot_id.as_deref())
        }) {
            if let Some(entry) = self.history_entry(p, EntrySource::Parent) {
                entries.push(entry);
            }
        }

        entries.extend(history_entries);

        entries.push(ContextEntry {
            role: self
                .policy
                .role_for(&event.author_id, event.bot_id.as_deref()),
            content: self.strip_mentions(&event.text),
            source: EntrySource::Trigger,
        });

        ContextWindow { entries }
    }

    fn history_entry(&self, msg: &HistoryMessage, source: EntrySource) -> Option<ContextEntry> {
        let content = self.strip_mentions(&msg.text);
        if content.is_empty() {
            return None;
        }
        Some(ContextEntry {
            role: self.policy.role_for(&msg.author_id, msg.bot_id.as_deref()),
            content,
            source,
        })
    }

    /// Remove the bot's own `<@U...>` mentions and surrounding whitespace
    pub fn strip_mentions(&self, text: &str) -> String {
        match self.policy.identity.mention_token() {
            Some(token) => text
                .replace(&token, " ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
            None => text.trim().to_string(),
        }
    }
}
