//! Bit-packed per-test coverage units.
//!
//! Bit `i` of a byte unit lives in byte `i / 8` at offset `i % 8`; a word
//! unit uses `i / 64` and `i % 64`. All arithmetic is unsigned.

/// Initial capacity, in bits, of a freshly allocated unit.
pub const DEFAULT_UNIT_BITS: usize = 1024;

/// Class-level unit: one bit per class index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteUnit {
    bytes: Vec<u8>,
}

impl ByteUnit {
    pub fn new() -> Self {
        Self::with_bits(DEFAULT_UNIT_BITS)
    }

    pub fn with_bits(bits: usize) -> Self {
        Self {
            bytes: vec![0; bits.div_ceil(8)],
        }
    }

    pub fn mark(&mut self, index: usize) {
        let byte = index / 8;
        if byte >= self.bytes.len() {
            self.bytes.resize(byte + 1, 0);
        }
        self.bytes[byte] |= 1u8 << (index % 8);
    }

    pub fn is_marked(&self, index: usize) -> bool {
        self.bytes
            .get(index / 8)
            .is_some_and(|b| b & (1u8 << (index % 8)) != 0)
    }

    /// Marked indices in ascending order.
    pub fn decode(&self) -> impl Iterator<Item = usize> + '_ {
        self.bytes.iter().enumerate().flat_map(|(i, &byte)| {
            (0..8usize)
                .filter(move |bit| byte & (1u8 << bit) != 0)
                .map(move |bit| i * 8 + bit)
        })
    }
}

/// Method-level unit: one bit per method index, packed into words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordUnit {
    words: Vec<u64>,
}

impl WordUnit {
    pub fn new() -> Self {
        Self {
            words: vec![0; DEFAULT_UNIT_BITS.div_ceil(64)],
        }
    }

    pub fn mark(&mut self, index: usize) {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (index % 64);
    }

    pub fn decode(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            (0..64usize)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| i * 64 + bit)
        })
    }
}

/// Line-level unit: `[file index][line / 8]`, rows allocated on first mark.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineUnit {
    files: Vec<Option<ByteUnit>>,
}

impl LineUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, file_index: usize, line: u32) {
        if file_index >= self.files.len() {
            self.files.resize(file_index + 1, None);
        }
        self.files[file_index]
            .get_or_insert_with(|| ByteUnit::with_bits(0))
            .mark(line as usize);
    }

    /// `(file index, line)` pairs in ascending order.
    pub fn decode(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.files.iter().enumerate().flat_map(|(file, row)| {
            row.iter()
                .flat_map(|unit| unit.decode())
                .map(move |line| (file, line as u32))
        })
    }
}

/// One test's coverage at the recorder's granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageUnit {
    Class(ByteUnit),
    Method(WordUnit),
    Line(LineUnit),
}
