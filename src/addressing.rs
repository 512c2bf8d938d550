use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::platform::InboundEvent;

/// Decides whether an inbound message is meant for the bot.
///
/// Direct chats are always processed. Group messages are processed when any
/// of several weak addressing signals is present: the bot's own address in
/// the mention list, any mention at all, one of the bot's names in the text,
/// or a reply to one of the bot's messages.
pub struct AddressingClassifier {
    names: Option<Regex>,
}

/// Build a case-insensitive whole-word pattern for the given aliases.
/// Whitespace inside an alias matches any run of whitespace.
fn alias_pattern(aliases: &[String]) -> Option<String> {
    let alternatives: Vec<String> = aliases
        .iter()
        .map(|alias| {
            alias
                .split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .filter(|alt| !alt.is_empty())
        .collect();

    if alternatives.is_empty() {
        None
    } else {
        Some(format!(r"(?i)\b({})\b", alternatives.join("|")))
    }
}

impl AddressingClassifier {
    pub fn new(aliases: &[String]) -> Result<Self> {
        let names = alias_pattern(aliases)
            .map(|pattern| Regex::new(&pattern))
            .transpose()
            .context("Failed to compile bot alias pattern")?;
        Ok(Self { names })
    }

    fn mentions_name(&self, body: &str) -> bool {
        self.names.as_ref().is_some_and(|re| re.is_match(body))
    }

    pub fn should_process(&self, event: &InboundEvent, identity: Option<&str>) -> bool {
        if event.is_status || event.body.is_empty() {
            return false;
        }

        if !event.is_group {
            return true;
        }

        let self_mentioned =
            identity.is_some_and(|id| event.mentioned.iter().any(|m| m == id));
        let anyone_mentioned = !event.mentioned.is_empty();
        let name_mentioned = self.mentions_name(&event.body);

        debug!(
            "Group {} from {:?}: self_mentioned={} anyone_mentioned={} name_mentioned={} reply_to_bot={}",
            event.from,
            event.author,
            self_mentioned,
            anyone_mentioned,
            name_mentioned,
            event.replies_to_bot
        );

        self_mentioned || anyone_mentioned || name_mentioned || event.replies_to_bot
    }
}
