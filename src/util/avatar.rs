// SPDX-License-Identifier: MPL-2.0

use unicode_segmentation::UnicodeSegmentation;

const FALLBACK_INITIALS: &str = "U";

/// Avatar fallback text: the first letter of the first two words, or the
/// first two letters of a single word.
pub fn initials(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return FALLBACK_INITIALS.to_string();
    }

    let words: Vec<&str> = name.split_whitespace().collect();
    let picked: String = if words.len() >= 2 {
        words[..2]
            .iter()
            .filter_map(|w| w.graphemes(true).next())
            .collect()
    } else {
        name.graphemes(true).take(2).collect()
    };

    picked.to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_words() {
        assert_eq!(initials("ada lovelace"), "AL");
        assert_eq!(initials("Grace Brewster Hopper"), "GB");
    }

    #[test]
    fn test_single_word() {
        assert_eq!(initials("rustacean"), "RU");
        assert_eq!(initials("x"), "X");
    }

    #[test]
    fn test_empty_falls_back() {
        assert_eq!(initials(""), "U");
        assert_eq!(initials("   "), "U");
    }

    #[test]
    fn test_grapheme_clusters_kept_whole() {
        assert_eq!(initials("e\u{301}mile zola"), "E\u{301}Z");
    }
}
