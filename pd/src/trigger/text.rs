//! Short-text trigger source
//!
//! Matches incoming text bodies against configured trigger phrases. A body
//! may carry a machine name after a `:` delimiter ("SUSPEND:ecu1");
//! without one the event targets all machines.

use std::sync::Arc;

use eyre::{Result, bail};
use tracing::{debug, info, warn};

use crate::domain::{ALL_MACHINES, ActivityState, Event, TriggerType};
use crate::engine::Engine;

/// Separates the trigger phrase from an optional machine name
const MACHINE_DELIMITER: char = ':';

/// One phrase-to-state rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRule {
    pub phrase: String,
    pub state: ActivityState,
}

/// Decodes short text commands into arbitration events
pub struct TextTrigger {
    engine: Arc<Engine>,
    rules: Vec<TextRule>,
}

impl TextTrigger {
    /// Build a trigger from configured rules
    pub fn new(engine: Arc<Engine>, rules: Vec<TextRule>) -> Result<Self> {
        for (i, rule) in rules.iter().enumerate() {
            if rule.phrase.trim().is_empty() {
                bail!("empty trigger phrase for state {}", rule.state);
            }
            if rule.state == ActivityState::Unknown {
                bail!("trigger phrase {:?} has no target state", rule.phrase);
            }
            if rules[..i]
                .iter()
                .any(|earlier| earlier.phrase.eq_ignore_ascii_case(&rule.phrase))
            {
                bail!("phrase {:?} is mapped to multiple states", rule.phrase);
            }
        }
        Ok(Self { engine, rules })
    }

    /// Match a text body against the configured phrases
    ///
    /// Returns the target state and machine name, or `None` when no phrase
    /// matches.
    pub fn parse(&self, body: &str) -> Option<(ActivityState, String)> {
        // Strip characters that transport layers are known to inject
        let body: String = body.chars().filter(|c| *c != '\n' && *c != '\\').collect();

        let (phrase, machine) = match body.split_once(MACHINE_DELIMITER) {
            Some((phrase, machine)) => (phrase, machine.trim()),
            None => (body.as_str(), ""),
        };
        let phrase = phrase.trim();
        let machine = if machine.is_empty() { ALL_MACHINES } else { machine };

        match self
            .rules
            .iter()
            .find(|rule| rule.phrase.eq_ignore_ascii_case(phrase))
        {
            Some(rule) => {
                info!(%phrase, %machine, state = %rule.state, "TextTrigger: valid trigger text");
                Some((rule.state, machine.to_string()))
            }
            None => {
                warn!(%phrase, "TextTrigger: text matches no trigger phrase");
                None
            }
        }
    }

    /// Decode one text body and submit the resulting event
    pub fn handle_text(&self, body: &str) -> Option<u64> {
        let (state, machine) = self.parse(body)?;
        debug!(%state, %machine, "TextTrigger: submitting event");
        Some(self.engine.submit(Event::new(TriggerType::Text, state, &machine)))
    }
}
