// Signer name normalization

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Strip diacritics, fold case and collapse whitespace.
///
/// `"  MARIA   Lémos "` and `"maria lemos"` normalize to the same string.
pub fn normalize_name(input: &str) -> String {
    let stripped: String = input.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_diacritics() {
        assert_eq!(normalize_name("João Conceição"), "joao conceicao");
        assert_eq!(normalize_name("Gestão Pública"), "gestao publica");
    }

    #[test]
    fn test_folds_case_and_collapses_whitespace() {
        assert_eq!(normalize_name("  Chefe   De\tGabinete "), "chefe de gabinete");
        assert_eq!(
            normalize_name("Chefe de Gabinete"),
            normalize_name("Chefe De Gabinete")
        );
    }

    #[test]
    fn test_precomposed_and_decomposed_forms_match() {
        assert_eq!(normalize_name("Lemos\u{00E9}"), normalize_name("Lemose\u{0301}"));
    }

    #[test]
    fn test_blank_input() {
        assert_eq!(normalize_name("   "), "");
    }
}
