//! The standard sampler implementation.
//!
//! After a decode step the engine exposes raw logits over the whole vocabulary. The
//! sampler turns those into one chosen [`Token`] via a fixed pipeline, applied in this
//! order:
//!
//! 1. top-k filter
//! 2. top-p (nucleus) filter
//! 3. temperature scaling
//! 4. repetition/frequency/presence penalties over a short lookback window
//! 5. softmax and a categorical draw
//!
//! Filtering the candidate pool before penalizing avoids spending penalties on tokens
//! that would already have been excluded.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Token;

/// One candidate token during sampling: its vocabulary id, raw logit, and (once
/// computed) normalized probability.
#[derive(Clone, Copy, Debug)]
pub struct TokenData {
    /// Vocabulary index of this candidate.
    pub id: i32,

    /// Raw score from the model.
    pub logit: f32,

    /// Probability after softmax; `0.0` until computed.
    pub p: f32,
}

/// Selects the next token from a candidate array.
///
/// Implementations may keep internal state (an RNG, adaptive statistics) and therefore
/// take `&mut self`.
pub trait Sampler {
    /// Picks one token from `candidates`.
    ///
    /// `recent_tokens` is the sequence decoded so far (prompt plus generated tokens),
    /// used for repetition penalties; `nl_token` identifies the newline token so it can
    /// be exempted.
    fn sample(
        &mut self,
        candidates: Vec<TokenData>,
        recent_tokens: &[Token],
        nl_token: Token,
    ) -> Token;
}

/// The fixed sampling pipeline used for chat completions.
///
/// Defaults are tuned for short, focused assistant replies: a small candidate pool and a
/// strongly greedy temperature, with frequency/presence penalties over the last few
/// tokens to break degenerate loops.
pub struct StandardSampler {
    /// Keep only the `top_k` most likely candidates. <= 0 keeps the whole vocabulary.
    pub top_k: i32,

    /// Nucleus filter: keep the smallest candidate prefix with cumulative probability
    /// `top_p`. 1.0 = disabled.
    pub top_p: f32,

    /// Minimum number of candidates every filter stage must leave behind.
    pub min_keep: usize,

    /// Temperature applied to the surviving logits. Lower is greedier.
    pub temp: f32,

    /// Number of trailing tokens considered by the penalty stage.
    pub penalty_last_n: i32,

    /// Multiplicative repetition penalty. 1.0 = disabled.
    pub penalty_repeat: f32,

    /// Frequency penalty, scaled by how often a token appears in the window.
    pub penalty_freq: f32,

    /// Presence penalty, applied once to any token that appears in the window.
    pub penalty_present: f32,

    /// Whether the newline token is subject to penalties.
    pub penalize_nl: bool,

    rng: StdRng,
}

impl StandardSampler {
    /// A sampler with the default pipeline and an explicit RNG seed, for reproducible
    /// output.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::default()
        }
    }

    fn apply_top_k(&self, candidates: &mut Vec<TokenData>) {
        if self.top_k <= 0 || candidates.len() <= self.top_k as usize {
            return;
        }

        candidates.sort_unstable_by(|a, b| b.logit.total_cmp(&a.logit));
        candidates.truncate((self.top_k as usize).max(self.min_keep));
    }

    fn apply_top_p(&self, candidates: &mut Vec<TokenData>) {
        if self.top_p >= 1.0 || candidates.len() <= self.min_keep {
            return;
        }

        softmax(candidates);

        let mut cumulative = 0.0;
        let mut keep = candidates.len();
        for (i, candidate) in candidates.iter().enumerate() {
            cumulative += candidate.p;
            if cumulative >= self.top_p {
                // The candidate that crosses the threshold stays in the pool.
                keep = i + 1;
                break;
            }
        }

        candidates.truncate(keep.max(self.min_keep));
    }

    fn apply_temperature(&self, candidates: &mut [TokenData]) {
        if self.temp <= 0.0 {
            return;
        }

        for candidate in candidates.iter_mut() {
            candidate.logit /= self.temp;
        }
    }

    fn apply_penalties(
        &self,
        candidates: &mut [TokenData],
        recent_tokens: &[Token],
        nl_token: Token,
    ) {
        if self.penalty_last_n <= 0 || recent_tokens.is_empty() {
            return;
        }

        let window_start = recent_tokens
            .len()
            .saturating_sub(self.penalty_last_n as usize);
        let mut counts: HashMap<i32, u32> = HashMap::new();
        for token in &recent_tokens[window_start..] {
            *counts.entry(token.0).or_insert(0) += 1;
        }

        for candidate in candidates.iter_mut() {
            if !self.penalize_nl && candidate.id == nl_token.0 {
                continue;
            }

            let Some(&count) = counts.get(&candidate.id) else {
                continue;
            };

            if self.penalty_repeat != 1.0 {
                if candidate.logit > 0.0 {
                    candidate.logit /= self.penalty_repeat;
                } else {
                    candidate.logit *= self.penalty_repeat;
                }
            }

            candidate.logit -= count as f32 * self.penalty_freq + self.penalty_present;
        }
    }

    fn draw(&mut self, candidates: &mut Vec<TokenData>) -> Token {
        softmax(candidates);

        let r: f32 = self.rng.gen();
        let mut cumulative = 0.0;
        for candidate in candidates.iter() {
            cumulative += candidate.p;
            if r < cumulative {
                return Token(candidate.id);
            }
        }

        // Floating-point rounding can leave the cumulative sum a hair under 1.0.
        Token(candidates.last().map(|c| c.id).unwrap_or(0))
    }
}

impl Sampler for StandardSampler {
    fn sample(
        &mut self,
        mut candidates: Vec<TokenData>,
        recent_tokens: &[Token],
        nl_token: Token,
    ) -> Token {
        self.apply_top_k(&mut candidates);
        self.apply_top_p(&mut candidates);
        self.apply_temperature(&mut candidates);
        self.apply_penalties(&mut candidates, recent_tokens, nl_token);
        self.draw(&mut candidates)
    }
}

impl Default for StandardSampler {
    fn default() -> Self {
        let clock_seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            top_k: 10,
            top_p: 0.8,
            min_keep: 1,
            temp: 0.1,
            penalty_last_n: 10,
            penalty_repeat: 1.0,
            penalty_freq: 0.7,
            penalty_present: 0.5,
            penalize_nl: false,
            rng: StdRng::seed_from_u64(clock_seed),
        }
    }
}

/// Sorts candidates by descending logit and fills in normalized probabilities.
fn softmax(candidates: &mut [TokenData]) {
    if candidates.is_empty() {
        return;
    }

    candidates.sort_unstable_by(|a, b| b.logit.total_cmp(&a.logit));

    let max_logit = candidates[0].logit;
    let mut total = 0.0;
    for candidate in candidates.iter_mut() {
        candidate.p = (candidate.logit - max_logit).exp();
        total += candidate.p;
    }
    for candidate in candidates.iter_mut() {
        candidate.p /= total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_candidates(n: usize) -> Vec<TokenData> {
        (0..n)
            .map(|id| TokenData {
                id: id as i32,
                logit: 0.0,
                p: 0.0,
            })
            .collect()
    }

    const NL: Token = Token(999);

    #[test]
    fn dominant_logit_always_wins() {
        let mut sampler = StandardSampler::with_seed(42);
        let mut candidates = flat_candidates(100);
        candidates[37].logit = 100.0;

        for _ in 0..20 {
            let token = sampler.sample(candidates.clone(), &[], NL);
            assert_eq!(token, Token(37));
        }
    }

    #[test]
    fn repeated_token_is_penalized_away() {
        let mut sampler = StandardSampler::with_seed(7);

        // Two near-tied candidates; the one we've been emitting should lose.
        let mut candidates = flat_candidates(50);
        candidates[3].logit = 10.0;
        candidates[4].logit = 9.95;

        let recent = vec![Token(3); 10];
        let token = sampler.sample(candidates, &recent, NL);
        assert_eq!(token, Token(4));
    }

    #[test]
    fn newline_is_exempt_from_penalties() {
        let mut sampler = StandardSampler::with_seed(7);
        let nl = Token(12);

        let mut candidates = flat_candidates(50);
        candidates[12].logit = 10.0;
        candidates[4].logit = 9.95;

        // A window full of newlines would otherwise bury candidate 12.
        let recent = vec![nl; 10];
        let token = sampler.sample(candidates.clone(), &recent, nl);
        assert_eq!(token, nl);

        sampler.penalize_nl = true;
        let token = sampler.sample(candidates, &recent, nl);
        assert_eq!(token, Token(4));
    }

    #[test]
    fn top_k_limits_the_pool() {
        let sampler = StandardSampler::with_seed(0);
        let mut candidates = flat_candidates(100);
        for (i, candidate) in candidates.iter_mut().enumerate() {
            candidate.logit = i as f32;
        }

        sampler.apply_top_k(&mut candidates);

        assert_eq!(candidates.len(), 10);
        assert!(candidates.iter().all(|c| c.id >= 90));
    }

    #[test]
    fn top_p_keeps_the_nucleus() {
        let sampler = StandardSampler::with_seed(0);

        // One candidate carries almost all of the mass.
        let mut candidates = flat_candidates(10);
        candidates[0].logit = 50.0;

        sampler.apply_top_p(&mut candidates);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, 0);
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let mut candidates = flat_candidates(30);
        candidates[5].logit = 2.0;
        candidates[6].logit = 2.0;

        let mut a = StandardSampler::with_seed(1234);
        let mut b = StandardSampler::with_seed(1234);

        for _ in 0..50 {
            let ta = a.sample(candidates.clone(), &[], NL);
            let tb = b.sample(candidates.clone(), &[], NL);
            assert_eq!(ta, tb);
        }
    }
}
