//! Progressive display of an answer that is already fully known.
//!
//! [`Reveal`] is a pure iterator over growing prefixes of the answer; timing is
//! applied separately by [`AnswerRevealer::play`]. Nothing here touches the
//! content that gets persisted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Character,
    Word,
}

impl Granularity {
    /// Pacing used when none is configured.
    pub fn default_step_delay(&self) -> Duration {
        match self {
            Granularity::Character => Duration::from_millis(20),
            Granularity::Word => Duration::from_millis(5),
        }
    }
}

/// Yields successively longer prefixes of `text`; the last one is `text` itself.
#[derive(Debug, Clone)]
pub struct Reveal<'a> {
    text: &'a str,
    granularity: Granularity,
    pos: usize,
}

pub fn reveal(text: &str, granularity: Granularity) -> Reveal<'_> {
    Reveal { text, granularity, pos: 0 }
}

impl<'a> Reveal<'a> {
    fn next_boundary(&self) -> usize {
        let rest = &self.text[self.pos..];
        match self.granularity {
            Granularity::Character => rest
                .chars()
                .next()
                .map(|c| self.pos + c.len_utf8())
                .unwrap_or(self.text.len()),
            Granularity::Word => {
                // Leading whitespace rides along with the next token.
                let token_start = rest
                    .char_indices()
                    .find(|(_, c)| !c.is_whitespace())
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                let token_end = rest[token_start..]
                    .char_indices()
                    .find(|(_, c)| c.is_whitespace())
                    .map(|(i, _)| token_start + i)
                    .unwrap_or(rest.len());
                if rest[token_end..].trim().is_empty() {
                    self.text.len()
                } else {
                    self.pos + token_end
                }
            }
        }
    }
}

impl<'a> Iterator for Reveal<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.pos >= self.text.len() {
            return None;
        }
        self.pos = self.next_boundary();
        Some(&self.text[..self.pos])
    }
}

/// Receives reveal frames. Implemented by whatever renders the answer.
pub trait RevealSink: Send {
    fn frame(&mut self, partial: &str);
    fn finish(&mut self, _full: &str) {}
}

/// Discards every frame.
pub struct NoReveal;

impl RevealSink for NoReveal {
    fn frame(&mut self, _partial: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerRevealer {
    pub granularity: Granularity,
    pub step_delay: Duration,
}

impl AnswerRevealer {
    pub fn new(granularity: Granularity, step_delay: Duration) -> Self {
        Self { granularity, step_delay }
    }

    pub fn reveal<'a>(&self, text: &'a str) -> Reveal<'a> {
        reveal(text, self.granularity)
    }

    /// Feeds every frame to `sink`, sleeping `step_delay` between frames.
    /// Returns the number of frames delivered.
    pub async fn play(&self, text: &str, sink: &mut dyn RevealSink) -> usize {
        let mut frames = 0;
        for partial in self.reveal(text) {
            if frames > 0 && !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
            sink.frame(partial);
            frames += 1;
        }
        sink.finish(text);
        frames
    }
}

impl Default for AnswerRevealer {
    fn default() -> Self {
        let granularity = Granularity::default();
        Self::new(granularity, granularity.default_step_delay())
    }
}
