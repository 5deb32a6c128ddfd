//! Branch, tag and Call-ID generation
//!
//! All three token kinds are runs of random letter pairs, an uppercase ASCII
//! letter followed by a lowercase one. Branches carry the RFC 3261 magic
//! cookie so that downstream elements recognise them as loop-detection
//! tokens.
//!
//! The random source is injected: production code seeds it once from OS
//! entropy, tests seed it with a fixed value. Clones of an [`IdGenerator`]
//! share the same source. Tokens are not cryptographically secure and their
//! uniqueness is only probabilistic.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Magic cookie every RFC 3261 branch starts with
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

const BRANCH_PAIRS: usize = 4;
const TAG_PAIRS: usize = 10;
const CALL_ID_PAIRS: usize = 20;

/// Length of a generated branch token
pub const BRANCH_LEN: usize = BRANCH_MAGIC_COOKIE.len() + 2 * BRANCH_PAIRS;
/// Length of a generated tag
pub const TAG_LEN: usize = 2 * TAG_PAIRS;
/// Length of a generated Call-ID
pub const CALL_ID_LEN: usize = 2 * CALL_ID_PAIRS;

/// Token generator over a shared, injectable random source
#[derive(Debug, Clone)]
pub struct IdGenerator {
    rng: Arc<Mutex<StdRng>>,
}

impl IdGenerator {
    /// Seed once from operating-system entropy
    pub fn from_entropy() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic generator, for tests and reproducible traffic
    pub fn from_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    /// Wrap an already-seeded source; clones of the result share it
    pub fn from_rng(rng: StdRng) -> Self {
        Self { rng: Arc::new(Mutex::new(rng)) }
    }

    /// Via branch: magic cookie followed by 4 letter pairs
    pub fn branch(&self) -> String {
        let mut branch = String::with_capacity(BRANCH_LEN);
        branch.push_str(BRANCH_MAGIC_COOKIE);
        self.push_pairs(&mut branch, BRANCH_PAIRS);
        branch
    }

    /// To/From tag: 10 letter pairs
    pub fn tag(&self) -> String {
        self.pairs(TAG_PAIRS)
    }

    /// Call-ID: 20 letter pairs
    pub fn call_id(&self) -> String {
        self.pairs(CALL_ID_PAIRS)
    }

    fn pairs(&self, count: usize) -> String {
        let mut out = String::with_capacity(2 * count);
        self.push_pairs(&mut out, count);
        out
    }

    fn push_pairs(&self, out: &mut String, count: usize) {
        let mut rng = self.rng.lock();
        for _ in 0..count {
            out.push(char::from(rng.gen_range(b'A'..=b'Z')));
            out.push(char::from(rng.gen_range(b'a'..=b'z')));
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}
