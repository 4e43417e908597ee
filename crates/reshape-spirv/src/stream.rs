use crate::codes::encode_string;

/// Append-only SPIR-V word stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpvStream {
    words: Vec<u32>,
}

impl SpvStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one instruction, computing its word count.
    pub fn emit(&mut self, opcode: u16, operands: &[u32]) {
        let count = operands.len() as u32 + 1;
        self.words.push((count << 16) | u32::from(opcode));
        self.words.extend_from_slice(operands);
    }

    /// Appends an instruction whose operands end in a literal string.
    pub fn emit_with_string(&mut self, opcode: u16, operands: &[u32], s: &str) {
        let mut all = operands.to_vec();
        all.extend(encode_string(s));
        self.emit(opcode, &all);
    }

    /// Appends pre-encoded words verbatim.
    pub fn extend(&mut self, words: &[u32]) {
        self.words.extend_from_slice(words);
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}
