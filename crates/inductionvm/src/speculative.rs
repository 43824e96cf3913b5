//! Speculative Decoding
//!
//! Proposes several tokens with a cheap draft model, then checks them
//! against the target model in one verification call.
//!
//! ## How It Works
//!
//! 1. **Draft**: propose up to K tokens continuing the context
//! 2. **Verify**: ask the target model what it would emit after the
//!    context and after each draft prefix
//! 3. **Accept**: keep the longest prefix of the draft that agrees with
//!    the target; everything after the first disagreement is discarded
//! 4. **Repeat** with the accepted tokens appended, until the token budget
//!    is spent or the end-of-sequence token appears
//!
//! A round whose accepted prefix is shorter than its draft ends there; the
//! next round drafts again from the extended context. When the very first
//! draft token is rejected the round emits the target's prediction instead,
//! so every round advances by at least one token. Generation only stops
//! early if the verifier returns no prediction at all.
//!
//! ## Example
//!
//! ```rust,ignore
//! use inductionvm::speculative::{SpeculativeConfig, SpeculativeDecoder};
//!
//! let mut decoder = SpeculativeDecoder::with_prompt_lookup(SpeculativeConfig::default())?;
//! let tokens = decoder.generate_speculative(&mut verifier, &prompt, 64)?;
//! ```

use crate::error::{InductionError, Result};
use crate::ir::Graph;
use crate::scheduler::Scheduler;
use crate::tensor::TensorEnv;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Token identifier
pub type TokenId = u32;

/// Configuration for speculative decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeculativeConfig {
    /// Whether the engine routes generation through the decoder
    pub enabled: bool,
    /// Identifier of the draft model
    pub draft_model_id: String,
    /// Tokens drafted per round (K)
    pub lookahead: usize,
    /// Longest n-gram the prompt-lookup drafter matches
    pub max_ngram: usize,
    /// Append the target's token at the first mismatch (or after a fully
    /// accepted draft)
    pub emit_correction: bool,
    /// Generation stops before emitting this token
    pub eos_token: Option<TokenId>,
}

impl Default for SpeculativeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            draft_model_id: "tiny-llama".to_string(),
            lookahead: 4,
            max_ngram: 3,
            emit_correction: false,
            eos_token: None,
        }
    }
}

impl SpeculativeConfig {
    /// Reject a zero lookahead or n-gram size
    pub fn validate(&self) -> Result<()> {
        if self.lookahead == 0 {
            return Err(InductionError::Config(
                "speculative lookahead must be at least 1".to_string(),
            ));
        }
        if self.max_ngram == 0 {
            return Err(InductionError::Config(
                "speculative max_ngram must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Statistics for speculative decoding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeculativeStats {
    /// Rounds run
    pub rounds: usize,
    /// Total draft tokens proposed
    pub draft_tokens: usize,
    /// Draft tokens accepted
    pub accepted_tokens: usize,
    /// Tokens emitted (accepted plus corrections and fallbacks)
    pub emitted_tokens: usize,
    /// Accepted / drafted (0.0 - 1.0)
    pub acceptance_rate: f32,
    /// Emitted tokens per verifier call
    pub avg_tokens_per_round: f32,
    /// Wall-clock time spent in rounds
    pub total_time_ms: f64,
}

impl SpeculativeStats {
    /// Create empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one round
    pub fn record_round(&mut self, drafted: usize, accepted: usize, emitted: usize, time_ms: f64) {
        self.rounds += 1;
        self.draft_tokens += drafted;
        self.accepted_tokens += accepted;
        self.emitted_tokens += emitted;
        self.total_time_ms += time_ms;
        if self.draft_tokens > 0 {
            self.acceptance_rate = self.accepted_tokens as f32 / self.draft_tokens as f32;
        }
        self.avg_tokens_per_round = self.emitted_tokens as f32 / self.rounds as f32;
    }

    /// Reset stats
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Cheap model proposing draft tokens
pub trait DraftModel {
    /// Propose up to `k` tokens continuing `context`.
    fn draft(&mut self, context: &[TokenId], k: usize) -> Result<Vec<TokenId>>;
}

impl<F> DraftModel for F
where
    F: FnMut(&[TokenId], usize) -> Result<Vec<TokenId>>,
{
    fn draft(&mut self, context: &[TokenId], k: usize) -> Result<Vec<TokenId>> {
        self(context, k)
    }
}

/// Target model used to check drafts
pub trait Verifier {
    /// Target predictions for a draft.
    ///
    /// Element `i` is the token the target emits after
    /// `context ++ draft[..i]`. The result may hold one extra element (the
    /// token after the whole draft). For an empty draft the first element
    /// is the next token after `context`.
    fn verify(&mut self, context: &[TokenId], draft: &[TokenId]) -> Result<Vec<TokenId>>;
}

impl<F> Verifier for F
where
    F: FnMut(&[TokenId], &[TokenId]) -> Result<Vec<TokenId>>,
{
    fn verify(&mut self, context: &[TokenId], draft: &[TokenId]) -> Result<Vec<TokenId>> {
        self(context, draft)
    }
}

/// Number of leading draft tokens the target agrees with.
///
/// Stops at the first disagreement even if later positions match again.
pub fn accept_prefix(draft: &[TokenId], verified: &[TokenId]) -> usize {
    draft
        .iter()
        .zip(verified)
        .take_while(|(d, v)| d == v)
        .count()
}

/// Drafts by copying what followed an earlier occurrence of the context's
/// trailing n-gram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptLookupDraft {
    /// Longest n-gram tried; shorter ones are tried after it
    pub max_ngram: usize,
}

impl PromptLookupDraft {
    /// Create a drafter matching n-grams of up to `max_ngram` tokens
    pub fn new(max_ngram: usize) -> Self {
        Self { max_ngram }
    }
}

impl DraftModel for PromptLookupDraft {
    fn draft(&mut self, context: &[TokenId], k: usize) -> Result<Vec<TokenId>> {
        let len = context.len();
        for n in (1..=self.max_ngram.min(len.saturating_sub(1))).rev() {
            let tail = &context[len - n..];
            // Most recent earlier occurrence wins
            let found = (0..len - n)
                .rev()
                .find(|&start| &context[start..start + n] == tail);
            if let Some(start) = found {
                let from = start + n;
                let to = (from + k).min(len);
                return Ok(context[from..to].to_vec());
            }
        }
        Ok(Vec::new())
    }
}

/// Index of the largest finite value; ties go to the lowest index.
fn argmax(row: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in row.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Verifier that runs the target model as an IR graph on a [`Scheduler`].
///
/// The builder turns a token sequence into a graph plus inputs whose
/// `logits` output holds one row per position (at least the last
/// `draft.len() + 1` positions); predictions are the greedy argmax of
/// those rows.
pub struct SchedulerVerifier<'a, B> {
    scheduler: &'a mut Scheduler,
    build: B,
    logits: String,
}

impl<'a, B> SchedulerVerifier<'a, B>
where
    B: FnMut(&[TokenId]) -> Result<(Graph, TensorEnv)>,
{
    /// Wrap a scheduler; `logits` names the graph output to read.
    pub fn new(scheduler: &'a mut Scheduler, logits: impl Into<String>, build: B) -> Self {
        Self {
            scheduler,
            build,
            logits: logits.into(),
        }
    }
}

impl<B> Verifier for SchedulerVerifier<'_, B>
where
    B: FnMut(&[TokenId]) -> Result<(Graph, TensorEnv)>,
{
    fn verify(&mut self, context: &[TokenId], draft: &[TokenId]) -> Result<Vec<TokenId>> {
        let sequence: Vec<TokenId> = context.iter().chain(draft).copied().collect();
        let (graph, inputs) = (self.build)(&sequence)?;
        let logits = self.scheduler.execute_for(&graph, inputs, &self.logits)?;

        let vocab = logits.last_dim();
        let values = logits.as_f32()?;
        let rows = values.len() / vocab;
        let needed = draft.len() + 1;
        if rows < needed {
            return Err(InductionError::Generation(format!(
                "logits have {} rows, verification needs {}",
                rows, needed
            )));
        }

        values
            .chunks_exact(vocab)
            .skip(rows - needed)
            .map(|row| {
                argmax(row).map(|i| i as TokenId).ok_or_else(|| {
                    InductionError::Generation("logits row has no finite value".to_string())
                })
            })
            .collect()
    }
}

/// Outcome of one draft/verify/accept round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Draft tokens proposed
    pub drafted: usize,
    /// Leading draft tokens the target agreed with
    pub accepted: usize,
    /// Tokens to emit this round
    pub tokens: Vec<TokenId>,
}

/// Draft-and-verify decoder
#[derive(Debug, Clone)]
pub struct SpeculativeDecoder<D> {
    config: SpeculativeConfig,
    draft: D,
}

impl SpeculativeDecoder<PromptLookupDraft> {
    /// Decoder using the prompt-lookup drafter
    pub fn with_prompt_lookup(config: SpeculativeConfig) -> Result<Self> {
        let draft = PromptLookupDraft::new(config.max_ngram);
        Self::new(config, draft)
    }
}

impl<D: DraftModel> SpeculativeDecoder<D> {
    /// Create a decoder around a draft model
    pub fn new(config: SpeculativeConfig, draft: D) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            draft = %config.draft_model_id,
            ahead = config.lookahead,
            "SpeculativeDecoder initialized"
        );
        Ok(Self { config, draft })
    }

    /// Draft model identifier
    pub fn draft_model_id(&self) -> &str {
        &self.config.draft_model_id
    }

    /// Tokens drafted per round
    pub fn lookahead(&self) -> usize {
        self.config.lookahead
    }

    /// Decoder configuration
    pub fn config(&self) -> &SpeculativeConfig {
        &self.config
    }

    /// Run one round against `context`.
    pub fn run_round<V: Verifier + ?Sized>(
        &mut self,
        verifier: &mut V,
        context: &[TokenId],
    ) -> Result<RoundOutcome> {
        let mut draft = self.draft.draft(context, self.config.lookahead)?;
        draft.truncate(self.config.lookahead);

        if draft.is_empty() {
            // No proposal: take one token straight from the target
            let next = verifier
                .verify(context, &[])?
                .first()
                .copied()
                .ok_or_else(|| {
                    InductionError::Generation("verifier returned no prediction".to_string())
                })?;
            return Ok(RoundOutcome {
                drafted: 0,
                accepted: 0,
                tokens: vec![next],
            });
        }

        let verified = verifier.verify(context, &draft)?;
        let accepted = accept_prefix(&draft, &verified);
        let mut tokens = draft[..accepted].to_vec();
        if self.config.emit_correction || accepted == 0 {
            // A rejected first token still yields the target's own next token
            if let Some(&next) = verified.get(accepted) {
                tokens.push(next);
            }
        }

        Ok(RoundOutcome {
            drafted: draft.len(),
            accepted,
            tokens,
        })
    }

    /// Generate up to `max_tokens` tokens after `prompt`.
    pub fn generate_speculative<V: Verifier + ?Sized>(
        &mut self,
        verifier: &mut V,
        prompt: &[TokenId],
        max_tokens: usize,
    ) -> Result<Vec<TokenId>> {
        self.generate_with_stats(verifier, prompt, max_tokens)
            .map(|(tokens, _)| tokens)
    }

    /// Like [`Self::generate_speculative`], also returning round statistics.
    pub fn generate_with_stats<V: Verifier + ?Sized>(
        &mut self,
        verifier: &mut V,
        prompt: &[TokenId],
        max_tokens: usize,
    ) -> Result<(Vec<TokenId>, SpeculativeStats)> {
        let mut context = prompt.to_vec();
        let mut output = Vec::with_capacity(max_tokens);
        let mut stats = SpeculativeStats::new();

        'rounds: while output.len() < max_tokens {
            let start = Instant::now();
            let round = self.run_round(verifier, &context)?;
            let emitted = round.tokens.len().min(max_tokens - output.len());
            stats.record_round(
                round.drafted,
                round.accepted,
                emitted,
                start.elapsed().as_secs_f64() * 1000.0,
            );
            tracing::debug!(
                drafted = round.drafted,
                accepted = round.accepted,
                emitted = round.tokens.len(),
                "Speculative round"
            );

            if round.tokens.is_empty() {
                tracing::warn!(
                    generated = output.len(),
                    "Speculative round made no progress, stopping"
                );
                break;
            }

            for token in round.tokens {
                if Some(token) == self.config.eos_token {
                    break 'rounds;
                }
                if output.len() >= max_tokens {
                    break 'rounds;
                }
                context.push(token);
                output.push(token);
            }
        }

        Ok((output, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Target that always continues with `last + 1`.
    fn counting_target(context: &[TokenId], draft: &[TokenId]) -> Result<Vec<TokenId>> {
        let mut seq = context.to_vec();
        let mut out = Vec::with_capacity(draft.len() + 1);
        for i in 0..=draft.len() {
            out.push(seq.last().map_or(0, |t| t + 1));
            if let Some(&d) = draft.get(i) {
                seq.push(d);
            }
        }
        Ok(out)
    }

    fn config(lookahead: usize, emit_correction: bool) -> SpeculativeConfig {
        SpeculativeConfig {
            lookahead,
            emit_correction,
            ..Default::default()
        }
    }

    #[test]
    fn test_accept_prefix_stops_at_first_mismatch() {
        assert_eq!(accept_prefix(&[1, 2, 3], &[1, 2, 9]), 2);
        assert_eq!(accept_prefix(&[1, 2, 3], &[1, 9, 3]), 1);
        assert_eq!(accept_prefix(&[1, 2, 3], &[1, 2, 3, 4]), 3);
        assert_eq!(accept_prefix(&[1, 2], &[]), 0);
    }

    #[test]
    fn test_partial_accept_round() {
        let draft = |_: &[TokenId], _: usize| -> Result<Vec<TokenId>> { Ok(vec![11, 12, 99]) };
        let mut decoder = SpeculativeDecoder::new(config(3, false), draft).unwrap();
        let mut target = counting_target;
        let round = decoder.run_round(&mut target, &[10]).unwrap();
        assert_eq!(round.drafted, 3);
        assert_eq!(round.accepted, 2);
        assert_eq!(round.tokens, vec![11, 12]);
    }

    #[test]
    fn test_correction_token_emitted() {
        let draft = |_: &[TokenId], _: usize| -> Result<Vec<TokenId>> { Ok(vec![11, 50]) };
        let mut decoder = SpeculativeDecoder::new(config(2, true), draft).unwrap();
        let mut target = counting_target;
        let round = decoder.run_round(&mut target, &[10]).unwrap();
        assert_eq!(round.tokens, vec![11, 12]);
    }

    #[test]
    fn test_generation_respects_budget() {
        let draft = |ctx: &[TokenId], k: usize| -> Result<Vec<TokenId>> {
            let last = ctx.last().copied().unwrap_or(0);
            Ok((1..=k as TokenId).map(|i| last + i).collect())
        };
        let mut decoder = SpeculativeDecoder::new(config(4, false), draft).unwrap();
        let mut target = counting_target;
        let (tokens, stats) = decoder.generate_with_stats(&mut target, &[0], 10).unwrap();
        assert_eq!(tokens, (1..=10).collect::<Vec<_>>());
        assert_eq!(stats.rounds, 3);
        assert_eq!(stats.acceptance_rate, 1.0);
    }

    #[test]
    fn test_rejected_first_token_emits_target_prediction() {
        let draft = |_: &[TokenId], _: usize| -> Result<Vec<TokenId>> { Ok(vec![42]) };
        let mut decoder = SpeculativeDecoder::new(config(4, false), draft).unwrap();
        let mut target = counting_target;
        let (tokens, stats) = decoder.generate_with_stats(&mut target, &[1], 8).unwrap();
        assert_eq!(tokens, (2..=9).collect::<Vec<_>>());
        assert_eq!(stats.accepted_tokens, 0);
        assert_eq!(stats.rounds, 8);
    }

    #[test]
    fn test_prompt_lookup_mispredict_fills_budget() {
        let mut decoder =
            SpeculativeDecoder::with_prompt_lookup(SpeculativeConfig::default()).unwrap();
        let mut target = counting_target;
        // Lookup drafts [3, 1, 2] and then [1, 2, 3], which the target rejects
        let (tokens, stats) = decoder
            .generate_with_stats(&mut target, &[1, 2, 3, 1, 2], 10)
            .unwrap();
        assert_eq!(tokens, (3..=12).collect::<Vec<_>>());
        assert!(stats.accepted_tokens >= 1);
    }

    #[test]
    fn test_silent_verifier_terminates() {
        let draft = |_: &[TokenId], _: usize| -> Result<Vec<TokenId>> { Ok(vec![42]) };
        let mut decoder = SpeculativeDecoder::new(config(4, false), draft).unwrap();
        let mut target = |_: &[TokenId], _: &[TokenId]| -> Result<Vec<TokenId>> { Ok(Vec::new()) };
        let tokens = decoder.generate_speculative(&mut target, &[1], 8).unwrap();
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_empty_draft_falls_back_to_target() {
        let mut decoder = SpeculativeDecoder::with_prompt_lookup(config(4, false)).unwrap();
        let mut target = counting_target;
        // No repeated n-gram, so every round is a single target step
        let tokens = decoder.generate_speculative(&mut target, &[5], 3).unwrap();
        assert_eq!(tokens, vec![6, 7, 8]);
    }

    #[test]
    fn test_eos_stops_generation() {
        let mut cfg = config(4, false);
        cfg.eos_token = Some(3);
        let mut decoder = SpeculativeDecoder::with_prompt_lookup(cfg).unwrap();
        let mut target = counting_target;
        let tokens = decoder.generate_speculative(&mut target, &[0], 10).unwrap();
        assert_eq!(tokens, vec![1, 2]);
    }

    #[test]
    fn test_prompt_lookup_copies_continuation() {
        let mut drafter = PromptLookupDraft::new(3);
        // Trailing [1, 2] occurred earlier, followed by [3, 4, 5]
        let draft = drafter.draft(&[1, 2, 3, 4, 5, 1, 2], 2).unwrap();
        assert_eq!(draft, vec![3, 4]);
        assert!(drafter.draft(&[7, 8, 9], 4).unwrap().is_empty());
        assert!(drafter.draft(&[], 4).unwrap().is_empty());
    }

    #[test]
    fn test_prompt_lookup_prefers_longest_match() {
        let mut drafter = PromptLookupDraft::new(2);
        // Unigram [2] last occurred before 8, bigram [1, 2] before 3
        let draft = drafter.draft(&[1, 2, 3, 2, 8, 1, 2], 1).unwrap();
        assert_eq!(draft, vec![3]);
    }

    #[test]
    fn test_zero_lookahead_rejected() {
        assert!(SpeculativeDecoder::with_prompt_lookup(config(0, false)).is_err());
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.9, 0.9, -1.0]), Some(1));
        assert_eq!(argmax(&[f32::NAN, 2.0]), Some(1));
        assert_eq!(argmax(&[f32::NAN]), None);
    }
}
