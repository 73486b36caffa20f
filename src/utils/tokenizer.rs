use rustc_hash::FxHashMap;

/// Tokens longer than this are almost always encoded blobs, not words.
const MAX_TOKEN_LENGTH: usize = 128;

/// Shortest token worth indexing
const MIN_TOKEN_LENGTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
enum CharType {
    Upper,
    Lower,
    Digit,
    Other,
}

fn classify_char(ch: char) -> CharType {
    if ch.is_uppercase() {
        CharType::Upper
    } else if ch.is_lowercase() {
        CharType::Lower
    } else if ch.is_numeric() {
        CharType::Digit
    } else {
        CharType::Other
    }
}

/// Split text into lower-cased terms with their occurrence counts.
///
/// Words are broken on anything that is not alphanumeric; camelCase words
/// additionally contribute their parts (`getUserById` yields `getuserbyid`,
/// `get`, `user`, `by`, `id`).
pub fn term_frequencies(text: &str) -> FxHashMap<String, u32> {
    let mut terms = FxHashMap::default();
    let mut word = String::new();
    let mut part = String::new();
    let mut parts = 0usize;
    let mut prev = CharType::Other;

    for ch in text.chars() {
        let kind = classify_char(ch);
        match kind {
            CharType::Other => {
                flush_word(&mut terms, &mut word, &mut part, &mut parts);
            }
            CharType::Upper if prev == CharType::Lower => {
                flush_part(&mut terms, &mut part, &mut parts);
                part.extend(ch.to_lowercase());
                word.extend(ch.to_lowercase());
            }
            _ => {
                part.extend(ch.to_lowercase());
                word.extend(ch.to_lowercase());
            }
        }
        prev = kind;
    }
    flush_word(&mut terms, &mut word, &mut part, &mut parts);

    terms
}

fn add_term(terms: &mut FxHashMap<String, u32>, term: &str) {
    let len = term.chars().count();
    if (MIN_TOKEN_LENGTH..=MAX_TOKEN_LENGTH).contains(&len) {
        *terms.entry(term.to_string()).or_insert(0) += 1;
    }
}

fn flush_part(terms: &mut FxHashMap<String, u32>, part: &mut String, parts: &mut usize) {
    if !part.is_empty() {
        add_term(terms, part);
        part.clear();
        *parts += 1;
    }
}

fn flush_word(
    terms: &mut FxHashMap<String, u32>,
    word: &mut String,
    part: &mut String,
    parts: &mut usize,
) {
    if *parts == 0 {
        // plain word: the last (only) part is the word itself
        part.clear();
        if !word.is_empty() {
            add_term(terms, word);
        }
    } else {
        flush_part(terms, part, parts);
        add_term(terms, word);
    }
    word.clear();
    *parts = 0;
}

/// Distinct query terms, sorted
pub fn tokenize_query(query: &str) -> Vec<String> {
    let mut result: Vec<_> = term_frequencies(query).into_keys().collect();
    result.sort();
    result
}
