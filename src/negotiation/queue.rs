//! Pending deals and the recency cache

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::policy::{Decision, PricePolicy};
use super::types::Submission;
use crate::timer::{Scheduler, TimerId, TimerKind};
use crate::types::{Deal, DealKey};

/// How long a neutral deal stays available for a manual negotiation
pub const RECENT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct CachedDeal {
    deal: Deal,
    expiry: TimerId,
}

/// FIFO of deals to handle automatically, plus a short-lived cache of
/// neutral ones the player may still negotiate by hand
#[derive(Debug, Default)]
pub struct DealQueue {
    pending: VecDeque<Deal>,
    recent: HashMap<DealKey, CachedDeal>,
}

impl DealQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take in a fresh suggestion, superseding any older one for the same key
    pub fn submit(
        &mut self,
        deal: Deal,
        policy: &PricePolicy,
        cache_neutral: bool,
        scheduler: &mut dyn Scheduler,
    ) -> Submission {
        let key = deal.key();
        self.pending.retain(|queued| queued.key() != key);
        self.evict(key, scheduler);

        match policy.decide(deal.seller_price, deal.offered_price) {
            decision @ (Decision::Accept | Decision::Decline) => {
                self.pending.push_back(deal);
                Submission::Queued(decision)
            }
            Decision::Neutral if cache_neutral => {
                let expiry = scheduler.schedule(TimerKind::RecentExpiry(key), RECENT_TTL);
                self.recent.insert(key, CachedDeal { deal, expiry });
                Submission::Cached
            }
            Decision::Neutral => Submission::Dropped,
        }
    }

    /// Oldest pending deal
    pub fn take_next(&mut self) -> Option<Deal> {
        self.pending.pop_front()
    }

    pub fn lookup_recent(&self, key: &DealKey) -> Option<&Deal> {
        self.recent.get(key).map(|cached| &cached.deal)
    }

    /// Drop a cached deal and its expiry timer
    pub fn evict(&mut self, key: DealKey, scheduler: &mut dyn Scheduler) -> Option<Deal> {
        let cached = self.recent.remove(&key)?;
        scheduler.cancel(cached.expiry);
        Some(cached.deal)
    }

    /// Expiry timer fired. Ignored unless it is the entry's current timer.
    pub fn expire(&mut self, key: DealKey, timer: TimerId) -> bool {
        match self.recent.get(&key) {
            Some(cached) if cached.expiry == timer => {
                self.recent.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Deal> {
        self.pending.iter()
    }
}
