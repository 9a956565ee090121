//! Deterministic xorshift64 generator for synthetic data.
//!
//! Same seed, same stream, on every platform. Not for anything that needs
//! unpredictability.

#[derive(Debug, Clone)]
pub struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    /// A zero seed would stick at zero; it is replaced by 1.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform-ish in `0..bound`. `bound` of 0 yields 0.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.next_u64() % bound
    }

    pub fn next_usize(&mut self, bound: usize) -> usize {
        usize::try_from(self.next_below(bound as u64)).unwrap_or(0)
    }

    /// `digits` lowercase hex characters.
    pub fn next_hex(&mut self, digits: usize) -> String {
        let mut out = String::with_capacity(digits + 16);
        while out.len() < digits {
            out.push_str(&hex::encode(self.next_u64().to_le_bytes()));
        }
        out.truncate(digits);
        out
    }

    /// Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_usize(i + 1);
            items.swap(i, j);
        }
    }
}
