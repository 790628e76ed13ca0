//! Name normalization and string similarity for entity matching.

/// Normalize text for comparison (trim, lowercase, collapse whitespace).
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut prev_space = false;

    for ch in text.trim().chars() {
        let is_space = ch.is_whitespace();
        if is_space {
            if !prev_space {
                normalized.push(' ');
                prev_space = true;
            }
        } else {
            for lower in ch.to_lowercase() {
                normalized.push(lower);
            }
            prev_space = false;
        }
    }

    normalized
}

/// Normalize an entity name: punctuation becomes whitespace, then [`normalize_text`].
///
/// `"Acme, Inc."` and `"acme inc"` normalize to the same key.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    normalize_text(&spaced)
}

/// Jaro similarity in `[0, 1]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaro(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let window = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0_usize;

    for (i, ca) in a.iter().enumerate() {
        let start = i.saturating_sub(window);
        let end = (i + window + 1).min(b.len());
        for j in start..end {
            if !b_matched[j] && b[j] == *ca {
                a_matched[i] = true;
                b_matched[j] = true;
                matches += 1;
                break;
            }
        }
    }

    if matches == 0 {
        return 0.0;
    }

    let a_seq = a.iter().zip(&a_matched).filter(|(_, m)| **m).map(|(c, _)| c);
    let b_seq = b.iter().zip(&b_matched).filter(|(_, m)| **m).map(|(c, _)| c);
    let transpositions = a_seq.zip(b_seq).filter(|(x, y)| x != y).count() / 2;

    let m = matches as f64;
    (m / a.len() as f64 + m / b.len() as f64 + (m - transpositions as f64) / m) / 3.0
}

/// Jaro-Winkler similarity in `[0, 1]` (prefix scale 0.1, prefix up to 4 chars).
#[must_use]
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    let base = jaro(a, b);
    let prefix = a
        .chars()
        .zip(b.chars())
        .take(4)
        .take_while(|(x, y)| x == y)
        .count();
    let prefix = f64::from(u32::try_from(prefix).unwrap_or(4));
    base + prefix * 0.1 * (1.0 - base)
}

/// Jaro-Winkler over normalized names.
#[must_use]
pub fn name_similarity(a: &str, b: &str) -> f64 {
    jaro_winkler(&normalize_name(a), &normalize_name(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_name_strips_punctuation_and_case() {
        assert_eq!(normalize_name("  Acme,  Inc. "), "acme inc");
        assert_eq!(normalize_name("ACME inc"), "acme inc");
        assert_eq!(normalize_name("Node.js"), "node js");
    }

    #[test]
    fn jaro_winkler_known_values() {
        assert!((jaro_winkler("martha", "marhta") - 0.961).abs() < 0.001);
        assert!((jaro_winkler("dixon", "dicksonx") - 0.813).abs() < 0.001);
        assert!((jaro_winkler("same", "same") - 1.0).abs() < f64::EPSILON);
        assert!(jaro_winkler("abc", "xyz").abs() < f64::EPSILON);
    }

    #[test]
    fn similar_names_score_high() {
        assert!(name_similarity("Jonathan Smith", "Jonathon Smith") > 0.92);
        assert!(name_similarity("Rust", "Python") < 0.6);
    }
}
