//! Text frontend
//!
//! Maps cleaned phoneme strings onto the fixed symbol vocabulary. Full
//! phonemization (grapheme-to-phoneme conversion) is an external
//! collaborator; this module only owns the symbol table and the
//! string-to-ID boundary.

pub mod symbols;

use std::collections::HashMap;

pub use symbols::{num_symbols, PAD};

/// ID of the padding symbol.
pub const PAD_ID: u32 = 0;

/// Lookup table between symbols and model input IDs.
pub struct SymbolTable {
    to_id: HashMap<char, u32>,
    symbols: Vec<char>,
}

impl SymbolTable {
    /// Build the table over the fixed vocabulary.
    pub fn new() -> Self {
        let symbols = symbols::symbols();
        let to_id = symbols
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as u32))
            .collect();
        Self { to_id, symbols }
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True when the table holds no symbols (never, in practice).
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Convert a cleaned string into symbol IDs. Characters outside the
    /// vocabulary are dropped.
    pub fn text_to_sequence(&self, text: &str) -> Vec<u32> {
        text.chars().filter_map(|c| self.to_id.get(&c).copied()).collect()
    }

    /// Convert IDs back to their symbols, skipping out-of-range IDs.
    pub fn sequence_to_text(&self, ids: &[u32]) -> String {
        ids.iter()
            .filter_map(|&id| self.symbols.get(id as usize))
            .collect()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal cleaning applied before symbol lookup: lowercases and
/// collapses whitespace runs to single spaces. Anything heavier
/// (number expansion, phonemization) happens upstream.
pub fn clean_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_space = true;
    for c in lowered.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(c);
            last_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let table = SymbolTable::new();
        let ids = table.text_to_sequence("həloʊ");
        assert_eq!(table.sequence_to_text(&ids), "həloʊ");
    }

    #[test]
    fn test_unknown_symbols_dropped() {
        let table = SymbolTable::new();
        let ids = table.text_to_sequence("a#b");
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Hello   World \n"), "hello world");
    }

    #[test]
    fn test_pad_id() {
        let table = SymbolTable::new();
        assert_eq!(table.text_to_sequence("_"), vec![PAD_ID]);
    }
}
