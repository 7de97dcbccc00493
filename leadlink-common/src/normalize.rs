//! Normalization primitives for lead matching
//!
//! These transforms are deterministic and idempotent: `f(f(x)) = f(x)` for
//! every input. Email and phone normalization run identically on both sides
//! of every comparison. Addresses use [`normalize_address`] on the CSV side
//! and [`clean_address`] on the CRM mirror; the fuzzy scorer compares the
//! two with trigram similarity.

use std::collections::HashSet;

/// Minimum digit count for a phone number to act as an exact-match key.
pub const PHONE_MATCH_KEY_MIN_DIGITS: usize = 10;

/// Address token abbreviations, applied on whole-word boundaries only.
const ADDRESS_ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("boulevard", "blvd"),
    ("drive", "dr"),
    ("road", "rd"),
    ("lane", "ln"),
    ("court", "ct"),
    ("apartment", "apt"),
    ("suite", "ste"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
];

/// Normalize an email address: trim and lowercase. Empty input becomes None.
pub fn normalize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase())
}

/// Normalize a phone number: strip all non-digit characters.
///
/// The stored value keeps whatever digits were present; see
/// [`phone_match_key`] for the exact-match gate.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some(digits)
}

/// Return the phone key usable for exact matching, or None when the
/// normalized number has fewer than 10 digits.
pub fn phone_match_key(normalized: &str) -> Option<&str> {
    if normalized.len() >= PHONE_MATCH_KEY_MIN_DIGITS {
        Some(normalized)
    } else {
        None
    }
}

/// Lowercase, trim, and collapse whitespace runs to single spaces.
///
/// This is the cleanup applied to mirrored CRM addresses; CSV-side
/// canonical leads additionally go through the abbreviation table in
/// [`normalize_address`].
pub fn clean_address(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    Some(lowered.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Normalize a street address: lowercase, trim, expand abbreviations on
/// whole-word boundaries, collapse whitespace runs to single spaces.
pub fn normalize_address(raw: &str) -> Option<String> {
    let cleaned = clean_address(raw)?;

    // Replace alphabetic runs that match the abbreviation table, leaving
    // punctuation and digits in place ("boulevard," becomes "blvd,").
    let mut out = String::with_capacity(cleaned.len());
    let mut word = String::new();
    for ch in cleaned.chars() {
        if ch.is_ascii_alphabetic() {
            word.push(ch);
        } else {
            flush_word(&mut out, &mut word);
            out.push(ch);
        }
    }
    flush_word(&mut out, &mut word);

    Some(out)
}

fn flush_word(out: &mut String, word: &mut String) {
    if word.is_empty() {
        return;
    }
    let replaced = ADDRESS_ABBREVIATIONS
        .iter()
        .find(|(full, _)| full == word)
        .map(|(_, abbr)| *abbr)
        .unwrap_or(word.as_str());
    out.push_str(replaced);
    word.clear();
}

/// Character 3-gram set over a space-padded string.
fn trigrams(text: &str) -> HashSet<String> {
    let mut set = HashSet::new();
    if text.is_empty() {
        return set;
    }
    let padded = format!("  {}  ", text);
    let chars: Vec<char> = padded.chars().collect();
    if chars.len() < 3 {
        set.insert(padded);
        return set;
    }
    for window in chars.windows(3) {
        set.insert(window.iter().collect::<String>());
    }
    set
}

/// Jaccard-style trigram similarity in [0, 1].
///
/// Operates on already-normalized text; callers run the address cleanup
/// functions above first.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let a_set = trigrams(a);
    let b_set = trigrams(b);
    if a_set.is_empty() || b_set.is_empty() {
        return 0.0;
    }
    let intersection = a_set.intersection(&b_set).count() as f64;
    let union = a_set.union(&b_set).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}
