//! Implements the [`TokenBatch`] struct

use tracing::trace;

use crate::Token;

/// A fixed-capacity batch of tokens submitted to the engine for one decode call.
///
/// Each entry carries the token itself, its absolute position in the sequence, and a
/// flag selecting whether the engine should produce sampling logits for that position.
/// During prefill the whole prompt goes in with only the final position flagged; during
/// generation each batch holds a single flagged token.
pub struct TokenBatch {
    tokens: Vec<Token>,
    positions: Vec<i32>,
    logits: Vec<bool>,

    /// The maximum number of tokens this batch can have.
    capacity: usize,
}

impl TokenBatch {
    /// Creates an empty batch holding up to `capacity` tokens.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; this struct is only constructed inside this crate
    /// with the session's configured batch size.
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            panic!("Cannot create a batch with no capacity");
        }

        Self {
            tokens: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
            logits: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Removes all tokens, keeping the allocation.
    pub fn clear(&mut self) {
        self.tokens.clear();
        self.positions.clear();
        self.logits.clear();
    }

    /// Appends `token` at sequence position `position`, optionally requesting logits.
    ///
    /// Returns the entry's index within the batch, or `usize::MAX` if the batch is full.
    pub fn add(&mut self, token: Token, position: usize, logits: bool) -> usize {
        trace!(
            "Writing token {} of {} ({token:?})",
            self.tokens.len(),
            self.capacity
        );

        if self.tokens.len() == self.capacity {
            return usize::MAX;
        }

        self.tokens.push(token);
        self.positions.push(position as i32);
        self.logits.push(logits);

        self.tokens.len() - 1
    }

    /// Sets the logits flag of an existing entry.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    pub fn set_logits(&mut self, idx: usize, value: bool) {
        assert!(idx < self.tokens.len(), "Index out of bounds");

        self.logits[idx] = value;
    }

    /// The number of tokens currently in the batch.
    pub fn tokens(&self) -> usize {
        self.tokens.len()
    }

    /// The tokens in this batch, in submission order.
    pub fn token_ids(&self) -> &[Token] {
        &self.tokens
    }

    /// The sequence position of each entry.
    pub fn positions(&self) -> &[i32] {
        &self.positions
    }

    /// The logits flag of each entry.
    pub fn logit_flags(&self) -> &[bool] {
        &self.logits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_tracks_position_and_logits() {
        let mut batch = TokenBatch::new(4);

        assert_eq!(batch.add(Token(7), 0, false), 0);
        assert_eq!(batch.add(Token(8), 1, true), 1);
        assert_eq!(batch.tokens(), 2);
        assert_eq!(batch.token_ids(), &[Token(7), Token(8)]);
        assert_eq!(batch.positions(), &[0, 1]);
        assert_eq!(batch.logit_flags(), &[false, true]);
    }

    #[test]
    fn add_past_capacity_is_rejected() {
        let mut batch = TokenBatch::new(1);

        assert_eq!(batch.add(Token(1), 0, true), 0);
        assert_eq!(batch.add(Token(2), 1, true), usize::MAX);
        assert_eq!(batch.tokens(), 1);
    }

    #[test]
    fn clear_empties_but_keeps_capacity() {
        let mut batch = TokenBatch::new(2);
        batch.add(Token(1), 0, false);
        batch.add(Token(2), 1, true);

        batch.clear();

        assert_eq!(batch.tokens(), 0);
        assert_eq!(batch.add(Token(3), 2, true), 0);
    }

    #[test]
    fn set_logits_flips_existing_entry() {
        let mut batch = TokenBatch::new(2);
        batch.add(Token(1), 0, false);
        batch.set_logits(0, true);

        assert_eq!(batch.logit_flags(), &[true]);
    }
}
