//! Periodic desync detection for a player context.

use std::fmt;

use tokio::time::Instant;
use tracing::info;

use crate::sync::{
    reconciler::{Reconciler, Source, Verdict},
    snapshot::{GameState, Phase, Priority},
    store::Ledger,
};

/// How far display truth may lead the held snapshot before it is adopted.
pub const DEFAULT_DESYNC_GRACE_MS: u64 = 3_000;

/// Why a recovery was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesyncReason {
    /// Nothing was ever observed in the truth store and nothing is held.
    NeverObserved,
    /// Display truth is newer than the held snapshot by more than the grace window.
    TimestampSkew {
        /// Milliseconds by which display truth leads.
        gap_ms: u64,
    },
    /// Held intermission while the display already shows a question.
    MissedPhase,
}

impl fmt::Display for DesyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesyncReason::NeverObserved => f.write_str("no state ever observed"),
            DesyncReason::TimestampSkew { gap_ms } => {
                write!(f, "display truth ahead by {gap_ms}ms")
            }
            DesyncReason::MissedPhase => f.write_str("missed a phase transition"),
        }
    }
}

/// Snapshot to re-offer and the reason it was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    /// Detected divergence.
    pub reason: DesyncReason,
    /// Snapshot to offer, flagged as definitive truth.
    pub candidate: GameState,
}

/// Decide whether the held snapshot has diverged from the display.
///
/// Phase contradiction is checked first as it does not depend on timestamps.
/// The returned candidate is flagged as definitive truth.
pub fn assess(
    held: Option<&GameState>,
    observed_store: bool,
    display_truth: Option<&GameState>,
    latest: Option<&GameState>,
    grace_ms: u64,
) -> Option<RecoveryPlan> {
    let shows_question = |state: &&GameState| state.phase.phase() == Phase::Question;

    if held.is_some_and(|held| held.phase.phase() == Phase::Intermission) {
        if let Some(candidate) = latest
            .filter(shows_question)
            .or_else(|| display_truth.filter(shows_question))
        {
            return Some(plan(DesyncReason::MissedPhase, candidate));
        }
    }

    let truth = display_truth?;
    match held {
        None if !observed_store => Some(plan(DesyncReason::NeverObserved, truth)),
        None => None,
        Some(held) => {
            let gap_ms = truth.timestamp.saturating_sub(held.timestamp);
            (gap_ms > grace_ms && !held.same_emission(truth))
                .then(|| plan(DesyncReason::TimestampSkew { gap_ms }, truth))
        }
    }
}

fn plan(reason: DesyncReason, source: &GameState) -> RecoveryPlan {
    let candidate = source.clone().with_priority(Priority {
        definitive_truth: true,
        ..source.priority
    });
    RecoveryPlan { reason, candidate }
}

/// Run one desync check against the ledger and apply the recovery if needed.
/// Returns the reason when a recovery snapshot was accepted.
pub fn check(
    reconciler: &mut Reconciler,
    ledger: &Ledger,
    grace_ms: u64,
    now: Instant,
) -> Option<DesyncReason> {
    let display_truth = ledger.display_truth();
    let latest = ledger.game_state();
    let plan = assess(
        reconciler.held(),
        reconciler.observed_store(),
        display_truth.as_ref(),
        latest.as_ref(),
        grace_ms,
    )?;

    match reconciler.offer(plan.candidate, Source::Recovery, now) {
        Verdict::Accepted => {
            info!(player = reconciler.player_name(), reason = %plan.reason, "recovered from desync");
            Some(plan.reason)
        }
        _ => None,
    }
}
