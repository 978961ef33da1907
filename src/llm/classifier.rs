//! Memory collaborators backed by a chat completion endpoint.

use crate::config::LlmConfig;
use crate::error::{Result, SageError};
use crate::llm::client::{ChatClient, ChatOptions};
use crate::memory::classify::{
    ClassifierReply, ImportanceClassifier, MoodTopicClassifier, Summarizer, SummaryKind,
    parse_importance,
};
use crate::memory::types::EntryMetadata;
use tracing::debug;

const CLASSIFIER_SYSTEM_PROMPT: &str = "You are a helpful classifier.";
const SUMMARIZER_SYSTEM_PROMPT: &str =
    "You condense conversation logs into short, factual summaries for future context.";

const IMPORTANCE_PROMPT: &str = "On a scale of 1 to 5, how important is the following message \
for understanding the user's life, goals, or emotional state? Respond with a single integer \
(1=not important, 5=very important).\n\nMessage: ";

const MOOD_TOPIC_PROMPT: &str = "Classify the following message for mood (e.g., happy, sad, \
curious, frustrated, neutral), topic (e.g., work, relationships, self, ideas, health, other), \
and suggest a CSS color (hex or rgb) that best represents the mood. Respond in JSON: \
{\"mood\": ..., \"topic\": ..., \"color\": ...}.\n\nMessage: ";

const LOW_IMPORTANCE_PROMPT: &str =
    "Summarize these less important memories in 2-3 sentences for future context.\n\n";

const LONG_TERM_PROMPT: &str = "Summarize the following long-term memory log into a high-level \
overview of key topics, emotional trends, and recurring themes.\n\n";

const IMPORTANCE_MAX_TOKENS: u32 = 5;
const MOOD_TOPIC_MAX_TOKENS: u32 = 80;
const SUMMARY_MAX_TOKENS: u32 = 256;
const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Importance, mood/topic, and summary collaborator over one [`ChatClient`].
#[derive(Debug)]
pub struct LlmClassifier {
    client: ChatClient,
}

impl LlmClassifier {
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: ChatClient::new(config),
        }
    }

    #[must_use]
    pub fn from_client(client: ChatClient) -> Self {
        Self { client }
    }
}

impl ImportanceClassifier for LlmClassifier {
    fn classify_importance(&self, message: &str) -> Result<u8> {
        let reply = self.client.complete(
            CLASSIFIER_SYSTEM_PROMPT,
            &format!("{IMPORTANCE_PROMPT}{message}"),
            ChatOptions::classifier(IMPORTANCE_MAX_TOKENS),
        )?;
        parse_importance(&reply).ok_or_else(|| {
            SageError::Classifier(format!("no importance rating in reply: {reply:?}"))
        })
    }
}

impl MoodTopicClassifier for LlmClassifier {
    fn classify_mood_topic(&self, message: &str) -> Result<EntryMetadata> {
        let reply = self.client.complete(
            CLASSIFIER_SYSTEM_PROMPT,
            &format!("{MOOD_TOPIC_PROMPT}{message}"),
            ChatOptions::classifier(MOOD_TOPIC_MAX_TOKENS),
        )?;
        let parsed = ClassifierReply::parse(&reply);
        if let ClassifierReply::PartiallyParsed(_) = &parsed {
            debug!("mood/topic reply was not valid JSON, used key/value fallback");
        }
        Ok(parsed.into_metadata())
    }
}

impl Summarizer for LlmClassifier {
    fn summarize(&self, kind: SummaryKind, transcript: &str) -> Result<String> {
        let prompt = match kind {
            SummaryKind::LowImportance => format!("{LOW_IMPORTANCE_PROMPT}{transcript}"),
            SummaryKind::LongTermOverview => format!("{LONG_TERM_PROMPT}{transcript}\n\nSummary:"),
        };
        let summary = self.client.complete(
            SUMMARIZER_SYSTEM_PROMPT,
            &prompt,
            ChatOptions {
                temperature: SUMMARY_TEMPERATURE,
                max_tokens: SUMMARY_MAX_TOKENS,
            },
        )?;
        if summary.is_empty() {
            return Err(SageError::Llm("empty summary".to_owned()));
        }
        Ok(summary)
    }
}
