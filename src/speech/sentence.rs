//! Text normalization for speech output
//!
//! Assistant responses arrive as markdown; spoken output wants plain
//! sentences. The splitter strips markup, URLs and emoji, then cuts the text
//! on sentence boundaries so playback can start before the full response has
//! streamed in.

use regex::Regex;

/// Splits streamed response text into speakable sentences
pub struct SentenceSplitter {
    url: Regex,
    heading: Regex,
    emphasis: Regex,
    underscore: Regex,
    strike: Regex,
    inline_code: Regex,
    code_block: Regex,
    list_marker: Regex,
    ordered_marker: Regex,
    symbols: Regex,
    emoji: Regex,
    whitespace: Regex,
    sentence: Regex,
}

impl SentenceSplitter {
    /// Compile the normalization patterns
    pub fn new() -> Self {
        Self {
            url: Regex::new(r"https?://\S+").unwrap(),
            heading: Regex::new(r"#{1,6}\s*").unwrap(),
            emphasis: Regex::new(r"\*{1,3}([^*]+)\*{1,3}").unwrap(),
            underscore: Regex::new(r"_{1,3}([^_]+)_{1,3}").unwrap(),
            strike: Regex::new(r"~~([^~]+)~~").unwrap(),
            inline_code: Regex::new(r"`([^`]+)`").unwrap(),
            code_block: Regex::new(r"(?s)```.*?```").unwrap(),
            list_marker: Regex::new(r"(?m)^\s*[-*+•]\s*").unwrap(),
            ordered_marker: Regex::new(r"(?m)^\s*\d+\.\s*").unwrap(),
            symbols: Regex::new(r"[_~`|>\\<\[\]{}()#*=+-]").unwrap(),
            emoji: Regex::new(r"[\x{1F600}-\x{1F9FF}]").unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
            sentence: Regex::new(r"[^.!?。\n]+[.!?。]?").unwrap(),
        }
    }

    /// Strip markup and collapse whitespace
    pub fn clean(&self, text: &str) -> String {
        let text = self.code_block.replace_all(text, "");
        let text = self.url.replace_all(&text, "");
        let text = self.heading.replace_all(&text, "");
        let text = self.emphasis.replace_all(&text, "$1");
        let text = self.underscore.replace_all(&text, "$1");
        let text = self.strike.replace_all(&text, "$1");
        let text = self.inline_code.replace_all(&text, "$1");
        let text = self.list_marker.replace_all(&text, "");
        let text = self.ordered_marker.replace_all(&text, "");
        let text = self.symbols.replace_all(&text, " ");
        let text = self.emoji.replace_all(&text, "");
        let text = self.whitespace.replace_all(&text, " ");
        text.trim().to_string()
    }

    /// Clean `text` and split it into sentences
    ///
    /// Fragments of three characters or fewer are dropped; they are markup
    /// leftovers, not speech.
    pub fn split(&self, text: &str) -> Vec<String> {
        let cleaned = self.clean(text);
        if cleaned.is_empty() {
            return Vec::new();
        }
        self.sentence
            .find_iter(&cleaned)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| s.chars().count() > 2)
            .collect()
    }
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::new()
    }
}
