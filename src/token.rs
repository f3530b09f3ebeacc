//! Token estimates for the digest summary.
//!
//! Estimates are heuristics; they are meant to tell whether a digest fits a
//! context window, not to match any specific model's tokenizer.

const SIMPLE_CHARS_PER_TOKEN: usize = 4;
const ENHANCED_WORD_MULTIPLIER: f64 = 1.3;
const ENHANCED_SPECIAL_DIVISOR: usize = 10;

/// Type of tokenizer to use for estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenizerKind {
    /// Simple character-based tokenizer (~4 chars per token)
    #[default]
    Simple,
    /// Enhanced tokenizer with word and special character analysis
    Enhanced,
}

impl TokenizerKind {
    /// Creates a new tokenizer instance of this kind.
    #[must_use]
    pub fn create(self) -> Box<dyn TokenEstimator> {
        match self {
            Self::Simple => Box::new(SimpleTokenizer),
            Self::Enhanced => Box::new(EnhancedTokenizer),
        }
    }
}

/// Trait for estimating token counts in text.
pub trait TokenEstimator: Send + Sync {
    /// Estimates the number of tokens in the given text.
    ///
    /// Returns 0 only for empty text.
    fn estimate(&self, text: &str) -> usize;
}

/// Character-based tokenizer, roughly 4 characters per token.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SimpleTokenizer;

impl TokenEstimator for SimpleTokenizer {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        text.chars()
            .count()
            .saturating_add(SIMPLE_CHARS_PER_TOKEN - 1)
            .saturating_div(SIMPLE_CHARS_PER_TOKEN)
            .max(1)
    }
}

/// Averages a word-based and a character-based estimate, then adds a
/// penalty for punctuation-heavy text such as source code.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EnhancedTokenizer;

impl TokenEstimator for EnhancedTokenizer {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let words = text.split_whitespace().count();
        let chars = text.chars().count();
        let special_chars = count_special_chars(text);

        let word_estimate = (words as f64 * ENHANCED_WORD_MULTIPLIER) as usize;
        let char_estimate = chars.saturating_div(SIMPLE_CHARS_PER_TOKEN);
        let special_penalty = special_chars.saturating_div(ENHANCED_SPECIAL_DIVISOR);

        word_estimate
            .saturating_add(char_estimate)
            .saturating_div(2)
            .saturating_add(special_penalty)
            .max(1)
    }
}

#[inline]
fn count_special_chars(text: &str) -> usize {
    text.chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count()
}

/// Formats a token count for the summary: `N`, `N.Nk` or `N.NM`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_token_count(tokens: usize) -> String {
    match tokens {
        0..1_000 => tokens.to_string(),
        1_000..1_000_000 => format!("{:.1}k", tokens as f64 / 1_000.0),
        _ => format!("{:.1}M", tokens as f64 / 1_000_000.0),
    }
}
