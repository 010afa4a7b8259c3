//! Content Separator
//!
//! Splits a completed answer into the model's thinking trace and its final
//! response, using textual markers emitted by the upstream prompt format.
//! Marker lists are in priority order; the first marker present wins.

/// Thinking-section markers, highest priority first.
pub const THINKING_MARKERS: [&str; 3] = ["[THINKING_PROCESS]", "**思考过程：**", "思考过程："];

/// Response-section markers, highest priority first.
pub const RESPONSE_MARKERS: [&str; 3] = ["[RESPONSE_CONTENT]", "**回复内容：**", "回复内容："];

/// Response text used when only a thinking section was found.
pub const NO_RESPONSE_PLACEHOLDER: &str = "（未识别到明确的回复内容）";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Separation {
    Split { thinking: String, response: String },
    ThinkingOnly { thinking: String },
    Unchanged,
}

impl Separation {
    /// The `(thinking, response)` pair to store, if any.
    pub fn into_parts(self) -> Option<(String, String)> {
        match self {
            Separation::Split { thinking, response } => Some((thinking, response)),
            Separation::ThinkingOnly { thinking } => {
                Some((thinking, NO_RESPONSE_PLACEHOLDER.to_string()))
            }
            Separation::Unchanged => None,
        }
    }
}

fn find_marker(text: &str, markers: &[&str]) -> Option<usize> {
    markers.iter().find_map(|marker| text.find(marker))
}

/// Detect a thinking/response split.
///
/// Both slices keep their marker. A response marker before the thinking
/// marker leaves the text unchanged.
pub fn separate(text: &str) -> Separation {
    let Some(thinking_at) = find_marker(text, &THINKING_MARKERS) else {
        return Separation::Unchanged;
    };

    match find_marker(text, &RESPONSE_MARKERS) {
        Some(response_at) if response_at > thinking_at => Separation::Split {
            thinking: text[thinking_at..response_at].to_string(),
            response: text[response_at..].to_string(),
        },
        Some(_) => Separation::Unchanged,
        None => Separation::ThinkingOnly {
            thinking: text[thinking_at..].to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracketed_markers_split() {
        let text = "[THINKING_PROCESS]\nfoo\n[RESPONSE_CONTENT]\nbar";
        assert_eq!(
            separate(text),
            Separation::Split {
                thinking: "[THINKING_PROCESS]\nfoo\n".to_string(),
                response: "[RESPONSE_CONTENT]\nbar".to_string(),
            }
        );
    }

    #[test]
    fn test_heading_markers_split() {
        let text = "前言\n**思考过程：**\n先查表结构\n**回复内容：**\n使用 JOIN";
        match separate(text) {
            Separation::Split { thinking, response } => {
                assert!(thinking.starts_with("**思考过程：**"));
                assert!(!thinking.contains("回复内容"));
                assert_eq!(response, "**回复内容：**\n使用 JOIN");
            }
            other => panic!("unexpected separation: {:?}", other),
        }
    }

    #[test]
    fn test_plain_heading_markers() {
        let text = "思考过程：想一想\n回复内容：答案";
        assert_eq!(
            separate(text),
            Separation::Split {
                thinking: "思考过程：想一想\n".to_string(),
                response: "回复内容：答案".to_string(),
            }
        );
    }

    #[test]
    fn test_thinking_only() {
        let text = "intro [THINKING_PROCESS] still going";
        let separation = separate(text);
        assert_eq!(
            separation,
            Separation::ThinkingOnly {
                thinking: "[THINKING_PROCESS] still going".to_string()
            }
        );
        let (_, response) = separation.into_parts().unwrap();
        assert_eq!(response, NO_RESPONSE_PLACEHOLDER);
    }

    #[test]
    fn test_response_before_thinking_is_unchanged() {
        let text = "[RESPONSE_CONTENT] a [THINKING_PROCESS] b";
        assert_eq!(separate(text), Separation::Unchanged);
    }

    #[test]
    fn test_no_markers_is_unchanged() {
        assert_eq!(separate("just an answer"), Separation::Unchanged);
        assert_eq!(separate("[RESPONSE_CONTENT] only"), Separation::Unchanged);
        assert!(Separation::Unchanged.into_parts().is_none());
    }

    #[test]
    fn test_marker_priority_first_match_wins() {
        // the bracketed marker outranks the heading even when it appears later
        let text = "思考过程：x\n[THINKING_PROCESS]y\n[RESPONSE_CONTENT]z";
        assert_eq!(
            separate(text),
            Separation::Split {
                thinking: "[THINKING_PROCESS]y\n".to_string(),
                response: "[RESPONSE_CONTENT]z".to_string(),
            }
        );
    }
}
