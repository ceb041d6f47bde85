use once_cell::sync::Lazy;
use regex::Regex;

/// Words that can never be (part of) a plant name: determiners,
/// question words, state verbs, and plant-generic nouns. Used both to
/// trim extracted fragments and to decide that nothing substantive was
/// said.
const STOP_WORDS: &[&str] = &[
    "cómo", "como", "qué", "que", "cuándo", "cuando", "está", "esta", "están",
    "tiene", "necesita", "necesito", "parece", "hace", "debo", "puedo",
    "mi", "mis", "tu", "tus", "su", "sus", "la", "el", "las", "los",
    "un", "una", "este", "esa", "ese", "esos", "esas",
    "planta", "plantas", "sobre", "acerca", "para", "por", "con", "sin",
    "hoy", "día", "días", "agua", "riego", "luz", "bien", "mal", "omitir",
    "se", "ve", "es", "son", "muy", "algo", "plaga", "plagas",
];

/// Phrases that signal a generic question about "the plant" rather than
/// naming one. Only decisive when nothing substantive remains once they
/// are removed.
const GENERAL_PHRASES: &[&str] = &[
    "mi planta",
    "mis plantas",
    "cómo está",
    "como esta",
    "necesita",
    "se ve",
    "qué tal",
    "que tal",
];

/// Ordered pattern families, first match wins. Adding a phrasing means
/// adding a row here and a case in the table test below, nothing else.
///
/// 1. possessive/determiner + name + boundary ("mi lavanda.", "la rosa")
/// 2. name + state-verb ("lavanda está mustia")
/// 3. preposition + name ("sobre la lavanda", "acerca de romero")
static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(
            r"\b(?:mi|mis|la|el|las|los|esta|este|esa|ese)\s+([a-záéíóúüñ ]{2,})(?:$|[\s.,;:!?])",
        )
        .unwrap(),
        Regex::new(r"([a-záéíóúüñ ]{2,})\s+(?:está|necesita|tiene|se ve|parece)\b").unwrap(),
        Regex::new(r"\b(?:sobre|acerca de|de|para)\s+([a-záéíóúüñ ]{2,})(?:$|[\s.,;:!?])")
            .unwrap(),
    ]
});

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// True when the utterance is general-question phrasing with no other
/// content ("¿Cómo está mi planta?"). A named plant next to the same
/// phrasing ("mi cactaceae necesita agua") is not general.
fn is_general_question(text: &str) -> bool {
    let mut remainder = text.to_string();
    let mut matched = false;

    for phrase in GENERAL_PHRASES {
        if remainder.contains(phrase) {
            matched = true;
            remainder = remainder.replace(phrase, " ");
        }
    }

    if !matched {
        return false;
    }

    !remainder.split_whitespace().any(|w| {
        let letters: String = w.chars().filter(|c| c.is_alphabetic()).collect();
        letters.chars().count() >= 2 && !is_stop_word(&letters)
    })
}

/// Clean a matched fragment into a candidate: letters and spaces only,
/// drop a trailing stop-word, then drop stop-words token by token.
fn clean_fragment(fragment: &str) -> Option<String> {
    let letters_only: String = fragment
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect();
    let mut words: Vec<&str> = letters_only.split_whitespace().collect();

    if words.len() > 1 {
        if let Some(last) = words.last() {
            if is_stop_word(last) {
                words.pop();
            }
        }
    }

    let kept: Vec<&str> = words
        .into_iter()
        .filter(|w| w.chars().count() > 1 && !is_stop_word(w))
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join(" "))
    }
}

/// Extract a candidate plant name from a free-text utterance.
///
/// Returns `None` when no candidate could be found, which is not the
/// same as an empty match: `None` routes the turn to disambiguation or
/// plain forwarding. Extraction is best effort; a wrong candidate is an
/// accepted failure mode that the resolver recovers from.
pub fn extract_plant_name(utterance: &str) -> Option<String> {
    let text = utterance.to_lowercase().trim().to_string();

    if text.is_empty() {
        return None;
    }

    // Terse inputs like "lavanda" name the plant directly
    if !text.contains(char::is_whitespace) {
        return Some(text);
    }

    if is_general_question(&text) {
        return None;
    }

    for pattern in PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&text) {
            if let Some(fragment) = caps.get(1) {
                if let Some(candidate) = clean_fragment(fragment.as_str()) {
                    return Some(candidate);
                }
            }
            // First matching family decides, even if cleaning left nothing
            return None;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_token_is_returned_verbatim() {
        assert_eq!(extract_plant_name("lavanda"), Some("lavanda".to_string()));
        assert_eq!(extract_plant_name("  Romero "), Some("romero".to_string()));
    }

    #[test]
    fn general_questions_have_no_candidate() {
        for input in [
            "¿Cómo está mi planta?",
            "cómo está mi planta",
            "¿necesita agua mi planta?",
            "mis plantas",
        ] {
            assert_eq!(extract_plant_name(input), None, "input: {input}");
        }
    }

    #[test]
    fn pattern_table() {
        // (utterance, expected candidate)
        let cases = [
            // determiner + name + boundary
            ("mi lavanda está triste", Some("lavanda triste")),
            ("la rosa se ve bien", Some("rosa")),
            ("¿mi tomate cherry tiene plagas?", Some("tomate cherry")),
            // name + state-verb
            ("lavanda grande necesita algo", Some("lavanda grande")),
            // preposition + name
            ("cuéntame sobre la albahaca", Some("albahaca")),
            ("dime acerca de romero", Some("romero")),
            // general question phrasing beside a name is not general
            ("mi cactaceae necesita agua", Some("cactaceae")),
        ];

        for (input, expected) in cases {
            assert_eq!(
                extract_plant_name(input),
                expected.map(|s| s.to_string()),
                "input: {input}"
            );
        }
    }

    #[test]
    fn stop_words_are_stripped_from_fragments() {
        // "mi" consumed by the pattern, "planta" and "hoy" are stop-words
        assert_eq!(extract_plant_name("dime algo sobre la planta hoy"), None);
    }

    #[test]
    fn empty_and_whitespace_yield_none() {
        assert_eq!(extract_plant_name(""), None);
        assert_eq!(extract_plant_name("   "), None);
    }
}
