//! Presentation Policy
//!
//! Long messages default to a collapsed preview. The long flag is one-way:
//! once set it survives every later edit of the message.

use std::borrow::Cow;

use crate::message::ConversationMessage;

/// Characters past which a message counts as long.
pub const DEFAULT_COLLAPSE_THRESHOLD: usize = 500;

pub const ELLIPSIS: &str = "...";

const CODE_FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollapsePolicy {
    threshold: usize,
}

impl Default for CollapsePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_COLLAPSE_THRESHOLD)
    }
}

impl CollapsePolicy {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_long(&self, text: &str) -> bool {
        text.chars().count() > self.threshold
    }

    /// Re-evaluate the long/collapsed flags after a content mutation.
    pub fn observe(&self, message: &mut ConversationMessage) {
        if message.is_long_message {
            return;
        }
        if self.is_long(&message.full_text()) {
            message.is_long_message = true;
            message.is_collapsed = true;
        }
    }

    /// Preview text for a collapsed message.
    ///
    /// Fenced code keeps its opening fence line and only whole lines after it;
    /// anything else is cut at the character budget.
    pub fn preview<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !self.is_long(text) {
            return Cow::Borrowed(text);
        }
        if text.starts_with(CODE_FENCE) {
            return Cow::Owned(self.fenced_preview(text));
        }
        let mut preview = truncate_chars(text, self.threshold).to_string();
        preview.push_str(ELLIPSIS);
        Cow::Owned(preview)
    }

    /// Text to show for a message given its current collapse state.
    pub fn display_text<'a>(&self, message: &'a ConversationMessage) -> Cow<'a, str> {
        let text = message.full_text();
        if !message.is_collapsed {
            return text;
        }
        match text {
            Cow::Borrowed(text) => self.preview(text),
            Cow::Owned(text) => Cow::Owned(self.preview(&text).into_owned()),
        }
    }

    fn fenced_preview(&self, text: &str) -> String {
        // newline + ellipsis always fit after the last kept line
        let budget = self.threshold.saturating_sub(ELLIPSIS.len() + 1);

        let mut lines = text.split('\n');
        let mut preview = lines.next().unwrap_or_default().to_string();
        let mut used = preview.chars().count();

        for line in lines {
            let cost = line.chars().count() + 1;
            if used + cost > budget {
                break;
            }
            preview.push('\n');
            preview.push_str(line);
            used += cost;
        }

        preview.push('\n');
        preview.push_str(ELLIPSIS);
        preview
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
