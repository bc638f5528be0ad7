//! Context Fingerprint: an ordered, per-message hash vector used by the
//! Pool's matcher to find an Idle instance whose resident conversation
//! state is the longest prefix match of an incoming request.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextFingerprint(Vec<u64>);

impl ContextFingerprint {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_hashes(hashes: Vec<u64>) -> Self {
        Self(hashes)
    }

    pub fn from_messages<'a, I, M>(messages: I) -> Self
    where
        I: IntoIterator<Item = &'a M>,
        M: Hash + 'a,
    {
        Self(
            messages
                .into_iter()
                .map(|m| {
                    let mut hasher = DefaultHasher::new();
                    m.hash(&mut hasher);
                    hasher.finish()
                })
                .collect(),
        )
    }

    /// Appends one more message's hash, e.g. the assistant turn a task
    /// just generated, producing the resident fingerprint observed at
    /// end-of-task.
    pub fn extended_with<M: Hash>(&self, message: &M) -> Self {
        let mut hashes = self.0.clone();
        let mut hasher = DefaultHasher::new();
        message.hash(&mut hasher);
        hashes.push(hasher.finish());
        Self(hashes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    /// Length of the longest common leading run shared with `other`.
    pub fn common_prefix_len(&self, other: &ContextFingerprint) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// True if every element of `self` appears, in order, as the leading
    /// run of `other` — i.e. `self` is a true prefix of `other`.
    pub fn is_prefix_of(&self, other: &ContextFingerprint) -> bool {
        self.0.len() <= other.0.len() && self.common_prefix_len(other) == self.0.len()
    }
}
