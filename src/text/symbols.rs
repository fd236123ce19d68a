//! Input symbol inventory
//!
//! The model consumes integer IDs over a fixed vocabulary: a padding
//! symbol, punctuation, the hyphen, and an IPA phoneme set. Symbol order
//! is part of the checkpoint contract and must not be reshuffled.

/// Padding / silence symbol. Always ID 0.
pub const PAD: char = '_';

const PUNCTUATION: &str = "!'(),.:;? ";

const SPECIAL: &str = "-";

const PHONEMES: &[char] = &[
    'a', 'b', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'æ', 'ç', 'ð', 'ø',
    'ŋ', 'œ', 'ɐ', 'ɑ', 'ɔ', 'ə', 'ɛ', 'ɝ', 'ɡ', 'ɪ', 'ʁ', 'ʃ', 'ʊ',
    'ʌ', 'ʏ', 'ʒ', 'ʔ', 'ː', '\u{0303}', '\u{030d}', '\u{0329}', 'θ',
];

/// Full symbol list in ID order: pad, punctuation, hyphen, phonemes.
pub fn symbols() -> Vec<char> {
    let mut all = vec![PAD];
    all.extend(PUNCTUATION.chars());
    all.extend(SPECIAL.chars());
    all.extend(PHONEMES.iter().copied());
    all
}

/// Number of symbols in the vocabulary (the embedding table size).
pub fn num_symbols() -> usize {
    symbols().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_is_first_symbol() {
        assert_eq!(symbols()[0], PAD);
    }

    #[test]
    fn no_duplicate_symbols() {
        let all = symbols();
        let unique: std::collections::HashSet<char> = all.iter().copied().collect();
        assert_eq!(all.len(), unique.len());
    }
}
