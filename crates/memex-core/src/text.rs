//! Sentence splitting and citation cleanup.
//!
//! [`SentenceSplitter`] owns its compiled patterns. Build one per process and
//! pass it by reference to the selector.

use anyhow::Result;
use regex::Regex;

/// Splits text into sentences and strips inline citation markers.
pub struct SentenceSplitter {
    boundary: Regex,
    citation: Regex,
    citation_run: Regex,
    whitespace: Regex,
}

impl SentenceSplitter {
    /// Compile the splitting and citation patterns once.
    pub fn new() -> Result<Self> {
        Ok(Self {
            boundary: Regex::new(r"[.!?]\s+")?,
            citation: Regex::new(r"\[(\d+|\d+(?:,\s*\d+)+)\]")?,
            citation_run: Regex::new(r"(?:\[\d+\]\s*){2,}")?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Split at sentence-final punctuation followed by whitespace and an
    /// uppercase ASCII letter or digit. Each sentence is whitespace-collapsed.
    pub fn split(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let mut sentences = Vec::new();
        let mut start = 0;
        for m in self.boundary.find_iter(text) {
            let starts_sentence = text[m.end()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
            if !starts_sentence {
                continue;
            }
            // Keep the punctuation mark with the sentence it ends.
            self.push_collapsed(&mut sentences, &text[start..m.start() + 1]);
            start = m.end();
        }
        self.push_collapsed(&mut sentences, &text[start..]);
        sentences
    }

    /// Remove `[1]`, `[1, 2]` and `[1][2]` markers, then collapse whitespace.
    pub fn strip_citations(&self, text: &str) -> String {
        let t = self.citation_run.replace_all(text, " ");
        let t = self.citation.replace_all(&t, " ");
        self.whitespace.replace_all(&t, " ").trim().to_string()
    }

    fn push_collapsed(&self, out: &mut Vec<String>, part: &str) {
        let collapsed = self.whitespace.replace_all(part, " ");
        let collapsed = collapsed.trim();
        if !collapsed.is_empty() {
            out.push(collapsed.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_uppercase_and_digit_starts() {
        let s = SentenceSplitter::new().unwrap();
        let got = s.split("Load the config first. Then validate it! 2 checks run? yes they do.");
        assert_eq!(
            got,
            vec![
                "Load the config first.",
                "Then validate it!",
                "2 checks run? yes they do."
            ]
        );
    }

    #[test]
    fn test_split_keeps_abbreviation_like_breaks_joined() {
        let s = SentenceSplitter::new().unwrap();
        let got = s.split("See e.g. the docs.\n\n  Next   line here.");
        assert_eq!(got, vec!["See e.g. the docs.", "Next line here."]);
    }

    #[test]
    fn test_split_blank() {
        let s = SentenceSplitter::new().unwrap();
        assert!(s.split("   \n").is_empty());
    }

    #[test]
    fn test_strip_citations() {
        let s = SentenceSplitter::new().unwrap();
        assert_eq!(
            s.strip_citations("Secrets live in .env [1] files [2, 3] here [4][5][6]."),
            "Secrets live in .env files here ."
        );
        assert_eq!(s.strip_citations("keep [a] and [ 1 ]"), "keep [a] and [ 1 ]");
    }
}
