//! Single-slot handoff between the analysis producer and the render tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisResult;

/// What `publish` does when the consumer has not drained the slot yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPolicy {
    /// Overwrite the unread result with the new one.
    #[default]
    KeepLatest,
    /// Keep the unread result and discard the new one.
    DropNewest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The slot was empty.
    Stored,
    /// An unread result was overwritten.
    Replaced,
    /// The slot was full and the new result was discarded.
    Dropped,
}

/// Running totals kept by a [`ResultSlot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    pub published: u64,
    pub replaced: u64,
    pub dropped: u64,
    pub taken: u64,
}

/// Holds at most one [`AnalysisResult`].
///
/// Neither side ever waits on the other: the lock is only held while a
/// result moves in or out, and a take empties the slot so no result is
/// handed out twice.
#[derive(Debug, Default)]
pub struct ResultSlot {
    policy: SlotPolicy,
    slot: Mutex<Option<AnalysisResult>>,
    published: AtomicU64,
    replaced: AtomicU64,
    dropped: AtomicU64,
    taken: AtomicU64,
}

impl ResultSlot {
    pub fn new(policy: SlotPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> SlotPolicy {
        self.policy
    }

    pub fn publish(&self, result: AnalysisResult) -> PublishOutcome {
        self.published.fetch_add(1, Ordering::Relaxed);

        // Drop the displaced result after releasing the lock.
        let displaced;
        let outcome = {
            let mut slot = self.lock();
            match (slot.is_some(), self.policy) {
                (false, _) => {
                    *slot = Some(result);
                    displaced = None;
                    PublishOutcome::Stored
                }
                (true, SlotPolicy::KeepLatest) => {
                    displaced = slot.replace(result);
                    PublishOutcome::Replaced
                }
                (true, SlotPolicy::DropNewest) => {
                    displaced = Some(result);
                    PublishOutcome::Dropped
                }
            }
        };
        drop(displaced);

        match outcome {
            PublishOutcome::Replaced => {
                self.replaced.fetch_add(1, Ordering::Relaxed);
            }
            PublishOutcome::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PublishOutcome::Stored => {}
        }
        outcome
    }

    /// Removes the pending result, if one arrived since the last take.
    pub fn try_take(&self) -> Option<AnalysisResult> {
        let taken = self.lock().take();
        if taken.is_some() {
            self.taken.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Discards any pending result.
    pub fn clear(&self) {
        let stale = self.lock().take();
        drop(stale);
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            published: self.published.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            taken: self.taken.load(Ordering::Relaxed),
        }
    }

    // A panic while holding the lock cannot leave the Option half-written,
    // so a poisoned slot is still usable.
    fn lock(&self) -> MutexGuard<'_, Option<AnalysisResult>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::{analysis::SpectrumAnalyzer, decode::PcmFrame, normalize::SampleNormalizer};

    fn result(level: i16) -> AnalysisResult {
        let mut analyzer = SpectrumAnalyzer::new(8_000, 8);
        let block = SampleNormalizer::new(8)
            .normalize(&PcmFrame::new(vec![level; 8], 1))
            .unwrap();
        analyzer.analyze(block).unwrap()
    }

    fn level(result: &AnalysisResult) -> f32 {
        result.samples[0]
    }

    #[test]
    fn take_on_empty_returns_immediately() {
        let slot = ResultSlot::new(SlotPolicy::KeepLatest);
        assert!(slot.try_take().is_none());
        assert!(slot.is_empty());
    }

    #[test]
    fn keep_latest_overwrites_unread_results() {
        let slot = ResultSlot::new(SlotPolicy::KeepLatest);
        assert_eq!(slot.publish(result(100)), PublishOutcome::Stored);
        assert_eq!(slot.publish(result(200)), PublishOutcome::Replaced);

        let taken = slot.try_take().unwrap();
        assert!((level(&taken) - 200.0 / 32_768.0).abs() < 1e-6);
        assert!(slot.try_take().is_none());
    }

    #[test]
    fn drop_newest_keeps_the_unread_result() {
        let slot = ResultSlot::new(SlotPolicy::DropNewest);
        assert_eq!(slot.publish(result(100)), PublishOutcome::Stored);
        assert_eq!(slot.publish(result(200)), PublishOutcome::Dropped);

        let taken = slot.try_take().unwrap();
        assert!((level(&taken) - 100.0 / 32_768.0).abs() < 1e-6);
        assert_eq!(slot.publish(result(300)), PublishOutcome::Stored);
    }

    #[test]
    fn counts_every_outcome() {
        let slot = ResultSlot::new(SlotPolicy::KeepLatest);
        slot.publish(result(1));
        slot.publish(result(2));
        slot.try_take();
        slot.try_take();
        slot.publish(result(3));
        slot.clear();

        assert_eq!(
            slot.stats(),
            SlotStats {
                published: 3,
                replaced: 1,
                dropped: 0,
                taken: 1,
            }
        );
        assert!(slot.is_empty());
    }

    #[test]
    fn concurrent_producer_never_duplicates_results() {
        let slot = Arc::new(ResultSlot::new(SlotPolicy::KeepLatest));
        let sample = result(500);

        let producer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                for _ in 0..1_000 {
                    slot.publish(sample.clone());
                }
            })
        };

        let mut taken = 0;
        while !producer.is_finished() {
            if slot.try_take().is_some() {
                taken += 1;
            }
        }
        producer.join().unwrap();
        taken += slot.try_take().map_or(0, |_| 1);

        let stats = slot.stats();
        assert_eq!(stats.published, 1_000);
        assert_eq!(stats.taken, taken);
        assert_eq!(stats.taken + stats.replaced, stats.published);
    }
}
