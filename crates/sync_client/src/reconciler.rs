//! Polling fallback for the push channel.
//!
//! Every cycle re-fetches the whole board and reports only the cards whose aggregate vote
//! counts changed since the previous cycle, so a quiet board produces no updates at all.
//! Failed fetches back off geometrically and leave the retained counts alone.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use shared::domain::{Board, CardId};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    aggregation::{effective_tally, VoteTally},
    session::BoardSession,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
const BACKOFF_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CardTally {
    pub card_id: CardId,
    pub likes: u32,
    pub dislikes: u32,
}

pub type TallyCallback = Arc<dyn Fn(CardTally) + Send + Sync>;

#[derive(Debug, Default)]
pub struct PollDiff {
    retained: HashMap<CardId, VoteTally>,
    failures: u32,
}

impl PollDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diffs a fresh snapshot against the retained counts and resets the failure counter.
    /// Cards seen for the first time are reported; cards that disappeared are forgotten.
    pub fn observe(&mut self, board: &Board) -> Vec<CardTally> {
        let mut seen = HashSet::new();
        let mut changed = Vec::new();
        let cards = board
            .cards()
            .flat_map(|card| std::iter::once(card).chain(card.merged_cards.iter()));
        for card in cards {
            if !seen.insert(card.id) {
                continue;
            }
            let tally = effective_tally(card);
            if self.retained.insert(card.id, tally) != Some(tally) {
                changed.push(CardTally {
                    card_id: card.id,
                    likes: tally.likes,
                    dislikes: tally.dislikes,
                });
            }
        }
        self.retained.retain(|card_id, _| seen.contains(card_id));
        self.failures = 0;
        changed
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn retained(&self, card_id: CardId) -> Option<VoteTally> {
        self.retained.get(&card_id).copied()
    }

    /// `base × 1.5^failures`, saturating at the largest representable delay.
    pub fn next_delay(&self, base: Duration) -> Duration {
        let exponent = i32::try_from(self.failures).unwrap_or(i32::MAX);
        Duration::try_from_secs_f64(base.as_secs_f64() * BACKOFF_FACTOR.powi(exponent))
            .unwrap_or(Duration::MAX)
    }
}

/// Owns a running poll loop. Stopping or dropping it cancels the pending wait.
pub struct PollHandle {
    task: JoinHandle<()>,
    diff: Arc<Mutex<PollDiff>>,
}

impl PollHandle {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn failures(&self) -> u32 {
        self.diff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failures()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts polling `session`'s board. The first cycle runs one `base_interval` from now.
pub fn spawn_poller(
    session: Arc<BoardSession>,
    base_interval: Duration,
    on_update: TallyCallback,
) -> PollHandle {
    let diff = Arc::new(Mutex::new(PollDiff::new()));
    let loop_diff = Arc::clone(&diff);
    let task = tokio::spawn(async move {
        let mut delay = base_interval;
        loop {
            tokio::time::sleep(delay).await;
            let outcome = session.refresh().await;
            let (changed, failures, next_delay) = {
                let mut diff = loop_diff.lock().unwrap_or_else(PoisonError::into_inner);
                let changed = match &outcome {
                    Ok(board) => diff.observe(board),
                    Err(_) => {
                        diff.record_failure();
                        Vec::new()
                    }
                };
                (changed, diff.failures(), diff.next_delay(base_interval))
            };
            match outcome {
                Ok(_) => debug!(
                    board_id = %session.board_id(),
                    changed = changed.len(),
                    "poll: cycle complete"
                ),
                Err(err) => warn!(
                    board_id = %session.board_id(),
                    failures,
                    delay_ms = next_delay.as_millis() as u64,
                    error = %err,
                    "poll: fetch failed, backing off"
                ),
            }
            for tally in changed {
                on_update(tally);
            }
            delay = next_delay;
        }
    });
    PollHandle { task, diff }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
