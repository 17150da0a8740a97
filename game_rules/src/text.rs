//! Text normalization shared by every index in the workspace.

/// Words too common to carry retrieval signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "i",
    "if", "in", "is", "it", "its", "me", "my", "of", "on", "or", "the", "to", "was", "with",
];

/// Lowercase, strip punctuation, and split on whitespace.
///
/// Hyphens and apostrophes inside a word are dropped so "auto-hit" and
/// "autohit" index the same. Every other non-alphanumeric character acts as a
/// separator.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() {
            cleaned.extend(c.to_lowercase());
        } else if c == '-' || c == '\'' {
            continue;
        } else {
            cleaned.push(' ');
        }
    }

    cleaned.split_whitespace().map(str::to_string).collect()
}

/// Tokenize and drop stopwords. Used to pull search terms out of questions.
pub fn keywords(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !is_stopword(t))
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.binary_search(&token).is_ok()
}

/// Words that cancel the cue right after them ("no check", "not permitted").
const NEGATIONS: &[&str] = &["never", "no", "not", "without"];

/// Start positions of `phrase` as a contiguous run of whole tokens.
fn positions<'a>(tokens: &'a [String], phrase: &str) -> impl Iterator<Item = usize> + 'a {
    let needle = tokenize(phrase);
    let width = needle.len().max(1);
    tokens
        .windows(width)
        .enumerate()
        .filter(move |(_, window)| !needle.is_empty() && *window == needle.as_slice())
        .map(|(start, _)| start)
}

/// Whether `phrase` occurs in `tokens` on word boundaries, so "did" never
/// matches inside "splendid".
pub fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    positions(tokens, phrase).next().is_some()
}

/// Like [`contains_phrase`], but an occurrence right after a negation does
/// not count.
pub fn mentions(tokens: &[String], phrase: &str) -> bool {
    positions(tokens, phrase)
        .any(|start| start == 0 || !NEGATIONS.contains(&tokens[start - 1].as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_strips_punctuation() {
        assert_eq!(
            tokenize("The Goblin attacks! (again)"),
            vec!["the", "goblin", "attacks", "again"]
        );
    }

    #[test]
    fn test_tokenize_joins_hyphenated_words() {
        assert_eq!(tokenize("auto-hit, can't"), vec!["autohit", "cant"]);
    }

    #[test]
    fn test_keywords_drop_stopwords() {
        assert_eq!(
            keywords("Can I attack the unconscious goblin?"),
            vec!["attack", "unconscious", "goblin"]
        );
    }

    #[test]
    fn test_phrases_match_whole_words() {
        let tokens = tokenize("A splendid day; the party did rest.");
        assert!(contains_phrase(&tokens, "did"));
        assert!(contains_phrase(&tokens, "party did"));
        assert!(!contains_phrase(&tokens, "lend"));
        assert!(!contains_phrase(&tokens, "did the"));
        assert!(!contains_phrase(&tokens, ""));

        assert!(contains_phrase(&tokenize("you can't"), "can't"));
    }

    #[test]
    fn test_negated_mentions_do_not_count() {
        let tokens = tokenize("no check required, make a save");
        assert!(!mentions(&tokens, "check"));
        assert!(mentions(&tokens, "save"));
        assert!(contains_phrase(&tokens, "check"));
        assert!(mentions(&tokenize("check first, no check after"), "check"));
    }

    #[test]
    fn test_stopwords_sorted() {
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOPWORDS);
    }
}
