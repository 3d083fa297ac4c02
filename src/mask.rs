//! Component masks backed by a Vec<u64>.
//! Equality and hashing ignore trailing zero words so masks built with
//! different capacities compare equal.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

const BITS_PER_WORD: usize = 64;

/// Unlimited-width bitset over component type ids.
#[derive(Debug, Clone, Default)]
pub struct ComponentMask {
    words: Vec<u64>,
}

impl ComponentMask {
    /// Create an empty mask.
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Create a mask capable of holding at least `capacity` bits.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(BITS_PER_WORD)],
        }
    }

    /// Build a mask from a set of component ids.
    pub fn from_ids(ids: &[u32]) -> Self {
        let mut mask = Self::new();
        for &id in ids {
            mask.set(id as usize);
        }
        mask
    }

    /// Set the bit at `index`. Grows automatically.
    pub fn set(&mut self, index: usize) {
        let (word_idx, bit_idx) = (index / BITS_PER_WORD, index % BITS_PER_WORD);
        if word_idx >= self.words.len() {
            self.words.resize(word_idx + 1, 0);
        }
        self.words[word_idx] |= 1 << bit_idx;
    }

    /// Clear the bit at `index`.
    pub fn clear(&mut self, index: usize) {
        let (word_idx, bit_idx) = (index / BITS_PER_WORD, index % BITS_PER_WORD);
        if word_idx < self.words.len() {
            self.words[word_idx] &= !(1 << bit_idx);
        }
    }

    /// Check if the bit at `index` is set.
    pub fn contains(&self, index: usize) -> bool {
        let (word_idx, bit_idx) = (index / BITS_PER_WORD, index % BITS_PER_WORD);
        if word_idx >= self.words.len() {
            return false;
        }
        (self.words[word_idx] & (1 << bit_idx)) != 0
    }

    /// Returns true if every bit set in `other` is also set in self.
    pub fn contains_all(&self, other: &Self) -> bool {
        for (i, &word) in other.words.iter().enumerate() {
            let own = self.words.get(i).copied().unwrap_or(0);
            if own & word != word {
                return false;
            }
        }
        true
    }

    /// Returns true if this set shares any set bits with `other`.
    pub fn intersects(&self, other: &Self) -> bool {
        let len = self.words.len().min(other.words.len());
        for i in 0..len {
            if (self.words[i] & other.words[i]) != 0 {
                return true;
            }
        }
        false
    }

    /// Bitwise union.
    pub fn union(&self, other: &Self) -> Self {
        let len = self.words.len().max(other.words.len());
        let mut words = vec![0; len];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.words.get(i).copied().unwrap_or(0)
                | other.words.get(i).copied().unwrap_or(0);
        }
        Self { words }
    }

    /// Bitwise intersection.
    pub fn intersection(&self, other: &Self) -> Self {
        let len = self.words.len().min(other.words.len());
        let mut words = vec![0; len];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.words[i] & other.words[i];
        }
        Self { words }
    }

    /// Bits set in self but not in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        let mut words = self.words.clone();
        for (i, word) in words.iter_mut().enumerate() {
            *word &= !other.words.get(i).copied().unwrap_or(0);
        }
        Self { words }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True if no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Returns iterator over indices of set bits.
    pub fn ones(&self) -> OnesIter<'_> {
        OnesIter {
            mask: self,
            word_idx: 0,
            current_word: self.words.first().copied().unwrap_or(0),
        }
    }

    // Words up to and including the last non-zero word. Equality and hashing
    // must be capacity-independent.
    fn significant_words(&self) -> &[u64] {
        let end = self
            .words
            .iter()
            .rposition(|&w| w != 0)
            .map_or(0, |i| i + 1);
        &self.words[..end]
    }
}

impl PartialEq for ComponentMask {
    fn eq(&self, other: &Self) -> bool {
        self.significant_words() == other.significant_words()
    }
}

impl Eq for ComponentMask {}

impl Hash for ComponentMask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant_words().hash(state);
    }
}

pub struct OnesIter<'a> {
    mask: &'a ComponentMask,
    word_idx: usize,
    current_word: u64,
}

impl<'a> Iterator for OnesIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word != 0 {
                let trailing = self.current_word.trailing_zeros();
                self.current_word &= !(1 << trailing);
                return Some(self.word_idx * BITS_PER_WORD + trailing as usize);
            }

            self.word_idx += 1;
            if self.word_idx >= self.mask.words.len() {
                return None;
            }
            self.current_word = self.mask.words[self.word_idx];
        }
    }
}

/// Mask shared between threads. Single-bit updates go through a CAS loop on
/// the word; growth takes the write lock. A concurrent reader sees either the
/// old or the new word, never a torn one.
#[derive(Debug, Default)]
pub struct AtomicMask {
    words: RwLock<Vec<AtomicU64>>,
}

impl AtomicMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bit at `index`, growing the word array if needed.
    pub fn set(&self, index: usize) {
        let (word_idx, bit_idx) = (index / BITS_PER_WORD, index % BITS_PER_WORD);
        loop {
            {
                let words = self.words.read();
                if let Some(word) = words.get(word_idx) {
                    word.fetch_or(1 << bit_idx, Ordering::AcqRel);
                    return;
                }
            }
            let mut words = self.words.write();
            while words.len() <= word_idx {
                words.push(AtomicU64::new(0));
            }
            // Retry through the read path now that the word exists.
        }
    }

    /// Clear the bit at `index`.
    pub fn clear(&self, index: usize) {
        let (word_idx, bit_idx) = (index / BITS_PER_WORD, index % BITS_PER_WORD);
        let words = self.words.read();
        if let Some(word) = words.get(word_idx) {
            word.fetch_and(!(1 << bit_idx), Ordering::AcqRel);
        }
    }

    /// Check if the bit at `index` is set.
    pub fn contains(&self, index: usize) -> bool {
        let (word_idx, bit_idx) = (index / BITS_PER_WORD, index % BITS_PER_WORD);
        let words = self.words.read();
        words
            .get(word_idx)
            .is_some_and(|w| w.load(Ordering::Acquire) & (1 << bit_idx) != 0)
    }

    /// Copy out the current contents as a plain mask.
    pub fn snapshot(&self) -> ComponentMask {
        let words = self.words.read();
        ComponentMask {
            words: words.iter().map(|w| w.load(Ordering::Acquire)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(mask: &ComponentMask) -> u64 {
        let mut hasher = DefaultHasher::new();
        mask.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn set_and_contains() {
        let mut mask = ComponentMask::new();
        mask.set(3);
        mask.set(130);
        assert!(mask.contains(3));
        assert!(mask.contains(130));
        assert!(!mask.contains(64));
        assert_eq!(mask.count_ones(), 2);
    }

    #[test]
    fn containment_and_intersection() {
        let a = ComponentMask::from_ids(&[0, 1, 70]);
        let b = ComponentMask::from_ids(&[0, 70]);
        let c = ComponentMask::from_ids(&[2]);

        assert!(a.contains_all(&b));
        assert!(!b.contains_all(&a));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.difference(&b), ComponentMask::from_ids(&[1]));
        assert_eq!(a.intersection(&b), b);
        assert_eq!(b.union(&c), ComponentMask::from_ids(&[0, 2, 70]));
    }

    #[test]
    fn equality_ignores_trailing_words() {
        let small = ComponentMask::from_ids(&[5]);
        let mut large = ComponentMask::with_capacity(512);
        large.set(5);

        assert_eq!(small, large);
        assert_eq!(hash_of(&small), hash_of(&large));

        // Same ids in any order produce equal masks.
        let forward = ComponentMask::from_ids(&[1, 9, 200]);
        let reverse = ComponentMask::from_ids(&[200, 9, 1]);
        assert_eq!(forward, reverse);
        assert_eq!(hash_of(&forward), hash_of(&reverse));
    }

    #[test]
    fn clear_restores_equality_with_empty() {
        let mut mask = ComponentMask::from_ids(&[100]);
        mask.clear(100);
        assert_eq!(mask, ComponentMask::new());
        assert!(mask.is_empty());
    }

    #[test]
    fn ones_iterates_in_order() {
        let mask = ComponentMask::from_ids(&[2, 64, 65, 300]);
        let ids: Vec<usize> = mask.ones().collect();
        assert_eq!(ids, vec![2, 64, 65, 300]);
    }

    #[test]
    fn atomic_mask_grows_under_contention() {
        use std::sync::Arc;

        let mask = Arc::new(AtomicMask::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let mask = Arc::clone(&mask);
            handles.push(std::thread::spawn(move || {
                for i in 0..64 {
                    mask.set(t * 64 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(mask.snapshot().count_ones(), 256);
    }
}
