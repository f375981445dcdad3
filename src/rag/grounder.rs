//! Extractive answer composition from retrieved chunks.
//!
//! Answers are built only from sentences copied out of the chunks, so the
//! same question and chunks always produce the same text.

use std::sync::OnceLock;

use regex::Regex;

/// Returned when there are no chunks to ground an answer in.
pub const NO_RELEVANT_INFORMATION: &str =
    "I could not find relevant information about that in the uploaded document.";

/// Maximum sentences collected across all chunks.
const MAX_SENTENCES: usize = 6;

/// Maximum citation lines appended after the prose.
const MAX_CITATIONS: usize = 4;

/// Display width for each retained sentence.
const SENTENCE_WIDTH: usize = 260;

/// Sentences taken from a chunk that has no keyword match.
const FALLBACK_SENTENCES: usize = 2;

const ELLIPSIS: &str = "...";

fn keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\p{Alphabetic}{4,}").expect("keyword pattern is valid"))
}

/// Lower-cased alphabetic tokens of four or more letters.
fn keywords(question: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in keyword_pattern().find_iter(question) {
        let word = m.as_str().to_lowercase();
        if !found.contains(&word) {
            found.push(word);
        }
    }
    found
}

/// Split on whitespace that follows terminal punctuation.
fn split_sentences(text: &str) -> Vec<&str> {
    let text = text.trim();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        match chars.peek() {
            Some(&(end, next)) if next.is_whitespace() => {
                sentences.push(&text[start..end]);
                while let Some(&(_, w)) = chars.peek() {
                    if !w.is_whitespace() {
                        break;
                    }
                    chars.next();
                }
                start = chars.peek().map(|&(i, _)| i).unwrap_or(text.len());
            }
            _ => {}
        }
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Collapse whitespace and cut at a word boundary to fit `width` characters,
/// marking the cut with an ellipsis.
fn shorten(text: &str, width: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let budget = width.saturating_sub(ELLIPSIS.len());
    let mut kept = String::new();
    for word in &words {
        let extra = if kept.is_empty() { 0 } else { 1 };
        if kept.chars().count() + extra + word.chars().count() > budget {
            break;
        }
        if extra == 1 {
            kept.push(' ');
        }
        kept.push_str(word);
    }

    if kept.is_empty() {
        kept = collapsed.chars().take(budget).collect();
    }
    kept.push_str(ELLIPSIS);
    kept
}

fn supporting_sentences(keywords: &[String], chunk: &str) -> Vec<String> {
    let sentences = split_sentences(chunk);
    let mut matches: Vec<&str> = sentences
        .iter()
        .copied()
        .filter(|sentence| {
            let lowered = sentence.to_lowercase();
            keywords.iter().any(|keyword| lowered.contains(keyword.as_str()))
        })
        .collect();

    if matches.is_empty() {
        matches = sentences.into_iter().take(FALLBACK_SENTENCES).collect();
    }

    matches
        .into_iter()
        .map(|sentence| shorten(sentence, SENTENCE_WIDTH))
        .collect()
}

/// Compose a grounded answer from chunks given in rank order.
pub fn compose<S: AsRef<str>>(question: &str, ranked_chunks: &[S]) -> String {
    if ranked_chunks.is_empty() {
        return NO_RELEVANT_INFORMATION.to_string();
    }

    let keywords = keywords(question);
    let mut collected: Vec<(usize, String)> = Vec::new();

    'chunks: for (index, chunk) in ranked_chunks.iter().enumerate() {
        for sentence in supporting_sentences(&keywords, chunk.as_ref()) {
            collected.push((index + 1, sentence));
            if collected.len() >= MAX_SENTENCES {
                break 'chunks;
            }
        }
    }

    if collected.is_empty() {
        collected.push((1, shorten(ranked_chunks[0].as_ref(), SENTENCE_WIDTH)));
    }

    let explanation = collected
        .iter()
        .map(|(_, sentence)| sentence.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let citations = collected
        .iter()
        .take(MAX_CITATIONS)
        .map(|(source, sentence)| format!("- Source {}: {}", source, sentence))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Here's a summary from the uploaded document about \"{}\":\n\n{}\n\nSupporting excerpts from the document:\n{}",
        question.trim(),
        explanation.trim(),
        citations
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert_eq!(
            keywords("How does a bell make SOUND? Bell!"),
            vec!["does", "bell", "make", "sound"]
        );
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("One here. Two there!  Three?\nFour 3.5 units");
        assert_eq!(sentences, vec!["One here.", "Two there!", "Three?", "Four 3.5 units"]);
    }

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("short   text", 260), "short text");

        let long = "word ".repeat(100);
        let cut = shorten(&long, 20);
        assert!(cut.chars().count() <= 20);
        assert!(cut.ends_with("..."));
        assert_eq!(cut, "word word word...");

        let unbroken = "x".repeat(30);
        assert_eq!(shorten(&unbroken, 10), "xxxxxxx...");
    }

    #[test]
    fn test_empty_chunks_short_circuit() {
        let chunks: Vec<String> = Vec::new();
        assert_eq!(compose("anything", &chunks), NO_RELEVANT_INFORMATION);
    }

    #[test]
    fn test_keyword_sentences_in_rank_order() {
        let chunks = [
            "The bell vibrates to produce sound. Bells are made of metal.",
            "Sound travels through air as waves.",
        ];
        let answer = compose("How does a bell make sound?", &chunks);

        assert!(answer.contains("The bell vibrates to produce sound."));
        assert!(answer.contains("- Source 1: The bell vibrates to produce sound."));
        assert!(answer.contains("- Source 1: Bells are made of metal."));
        assert!(answer.contains("- Source 2: Sound travels through air as waves."));
        let first = answer.find("The bell vibrates").unwrap();
        let second = answer.find("Sound travels").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_fallback_to_first_two_sentences() {
        let chunks = ["Alpha one. Beta two. Gamma three."];
        let answer = compose("unrelated question words", &chunks);
        assert!(answer.contains("Alpha one. Beta two."));
        assert!(!answer.contains("Gamma three."));
    }

    #[test]
    fn test_fallback_to_excerpt_when_nothing_collected() {
        let chunks = ["   "];
        let answer = compose("anything here", &chunks);
        assert!(answer.starts_with("Here's a summary"));
        assert!(!answer.contains("- Source 2"));
    }

    #[test]
    fn test_sentence_cap_and_citation_cap() {
        let chunk = (0..10)
            .map(|i| format!("Sound fact number {}.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let answer = compose("sound", &[chunk.clone(), chunk]);

        assert!(answer.contains("Sound fact number 5."));
        assert!(!answer.contains("Sound fact number 6."));
        assert_eq!(answer.matches("- Source").count(), 4);
        assert!(!answer.contains("Source 2"));
    }

    #[test]
    fn test_long_sentences_are_truncated() {
        let chunk = format!("Sound {}.", "very ".repeat(100));
        let answer = compose("sound", &[chunk]);
        let citation = answer.lines().last().unwrap();
        assert!(citation.ends_with("..."));
        assert!(citation.chars().count() <= "- Source 1: ".len() + 260);
    }

    #[test]
    fn test_compose_is_deterministic() {
        let chunks = ["The bell vibrates to produce sound.", "Sound travels through air as waves."];
        let question = "How does a bell make sound?";
        assert_eq!(compose(question, &chunks), compose(question, &chunks));
    }
}
