// berthwatch/src/engine/dispatcher.rs
//
// Turns a tick's onsets into operator messages on the notification channel.
//
//   onsets > consolidate_above → one consolidated message with the count
//   otherwise                  → one message naming each vessel
//
// No "resolved" messages are ever sent. A failed send is reported to the
// caller; membership is already advanced and is not rolled back.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clients::telegram::escape_markdown;
use crate::clients::{with_timeout, MessageFormat, Notifier};
use crate::error::ClientError;

pub const DEFAULT_CONSOLIDATE_ABOVE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertMessage {
    Consolidated { count: usize },
    Itemized { vessels: Vec<String> },
}

impl AlertMessage {
    pub fn for_onsets(onsets: &[String], consolidate_above: usize) -> Option<Self> {
        if onsets.is_empty() { return None; }
        if onsets.len() > consolidate_above {
            Some(Self::Consolidated { count: onsets.len() })
        } else {
            Some(Self::Itemized { vessels: onsets.to_vec() })
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Consolidated { count } => format!(
                "🚨 *CRITICAL RISK ALERT*\n\n\
                 Berthwatch has detected *{count} new vessels* with a high probability of delay.\n\
                 Check the Operational Logs Dashboard for immediate action."
            ),
            Self::Itemized { vessels } => {
                let list = vessels.iter()
                    .map(|v| format!("• Vessel *{}*", escape_markdown(v)))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "🚨 *CRITICAL RISK ALERT*\n\n\
                     New critical delay risk detected:\n{list}\n\n\
                     Check the Operational Logs Dashboard for immediate action."
                )
            }
        }
    }
}

pub struct AlertDispatcher {
    notifier:          Arc<dyn Notifier>,
    target:            String,
    consolidate_above: usize,
    timeout:           Duration,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, target: impl Into<String>, consolidate_above: usize, timeout: Duration) -> Self {
        Self { notifier, target: target.into(), consolidate_above, timeout }
    }

    /// Send the message for this tick's onsets. Ok(None) when nothing to send.
    pub async fn dispatch(&self, onsets: &[String]) -> Result<Option<AlertMessage>, ClientError> {
        let Some(msg) = AlertMessage::for_onsets(onsets, self.consolidate_above) else { return Ok(None) };
        let text = msg.render();
        with_timeout("notifier", self.timeout,
            self.notifier.send_message(&self.target, &text, MessageFormat::Markdown)).await?;
        info!(onsets = onsets.len(), consolidated = matches!(msg, AlertMessage::Consolidated { .. }), "critical alert sent");
        Ok(Some(msg))
    }
}
