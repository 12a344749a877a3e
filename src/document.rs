//! Turns visual-word histograms into plain-text documents so image
//! signatures can be fed to an ordinary text indexer.

use crate::Histogram;

/// Token written for images whose histogram carries no words at all.
/// Word tokens are 1-based, so the placeholder can never collide.
pub const PLACEHOLDER_TOKEN: &str = "0";

/// How histogram weights become token repetitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMode {
    /// Emit word `i+1` `round(w_i * descriptor_count)` times. Expects an
    /// L1-normalized histogram; scaling by the image's own descriptor
    /// count is the single frequency policy used throughout this crate.
    Frequency,
    /// Emit word `i+1` once when `w_i > 0`.
    Presence,
}

/// Render a histogram as a whitespace-delimited stream of 1-based word
/// tokens.
///
/// An empty histogram, a zero-keypoint image, or weights that all round to
/// zero produce the single [`PLACEHOLDER_TOKEN`], so every image yields a
/// non-empty, retrievable document.
pub fn encode_document(histogram: &Histogram, descriptor_count: usize, mode: TokenMode) -> String {
    let mut tokens: Vec<String> = Vec::new();
    for (i, &weight) in histogram.iter().enumerate() {
        let word = (i + 1).to_string();
        match mode {
            TokenMode::Frequency => {
                let occurrences = (weight * descriptor_count as f32).round() as i64;
                for _ in 0..occurrences {
                    tokens.push(word.clone());
                }
            }
            TokenMode::Presence => {
                if weight > 0.0 {
                    tokens.push(word);
                }
            }
        }
    }
    if tokens.is_empty() {
        PLACEHOLDER_TOKEN.to_string()
    } else {
        tokens.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_mode_repeats_words_by_rounded_weight() {
        // normalized histogram of 4 descriptors: 2x word1, 1x word2, 1x word4
        let histogram: Histogram = vec![0.5, 0.25, 0.0, 0.25];
        let doc = encode_document(&histogram, 4, TokenMode::Frequency);
        assert_eq!(doc, "1 1 2 4");
    }

    #[test]
    fn presence_mode_emits_each_positive_word_once() {
        let histogram: Histogram = vec![0.5, 0.25, 0.0, 0.25];
        let doc = encode_document(&histogram, 4, TokenMode::Presence);
        assert_eq!(doc, "1 2 4");
    }

    #[test]
    fn empty_histogram_yields_placeholder() {
        let doc = encode_document(&Vec::new(), 0, TokenMode::Frequency);
        assert_eq!(doc, PLACEHOLDER_TOKEN);
    }

    #[test]
    fn all_zero_histogram_yields_placeholder() {
        let histogram: Histogram = vec![0.0; 16];
        assert_eq!(
            encode_document(&histogram, 0, TokenMode::Frequency),
            PLACEHOLDER_TOKEN
        );
        assert_eq!(
            encode_document(&histogram, 0, TokenMode::Presence),
            PLACEHOLDER_TOKEN
        );
    }

    #[test]
    fn tiny_weights_that_round_away_yield_placeholder() {
        let histogram: Histogram = vec![0.1, 0.2];
        let doc = encode_document(&histogram, 1, TokenMode::Frequency);
        assert_eq!(doc, PLACEHOLDER_TOKEN);
    }

    #[test]
    fn word_ids_are_one_based() {
        let histogram: Histogram = vec![0.0, 0.0, 1.0];
        let doc = encode_document(&histogram, 1, TokenMode::Frequency);
        assert_eq!(doc, "3");
    }
}
