// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

const BITS: usize = u64::BITS as usize;

/// Dense bit set over small integer keys (node and block indices).
#[derive(Debug, Clone, Default)]
pub struct BitVector {
    words: Vec<u64>,
}

impl BitVector {
    pub fn new(capacity: usize) -> Self {
        BitVector {
            words: vec![0; capacity.div_ceil(BITS)],
        }
    }

    /// Inserts `index`, growing as needed. Returns true if it was absent.
    pub fn insert(&mut self, index: usize) -> bool {
        let word = index / BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << (index % BITS);
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / BITS)
            .is_some_and(|w| w & (1u64 << (index % BITS)) != 0)
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }
}
