//! Deterministic lossy link for soak runs
//!
//! Datagrams are numbered as they enter the link. Every `drop_every`th is
//! dropped, every `duplicate_every`th is delivered twice and every
//! `swap_every`th is held back behind the datagram that follows it.

use bytes::Bytes;

/// Impairments applied by a [`LossyLink`] (0 disables one)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkProfile {
    pub drop_every: u64,
    pub duplicate_every: u64,
    pub swap_every: u64,
}

impl LinkProfile {
    fn hits(every: u64, n: u64) -> bool {
        every > 0 && n % every == 0
    }
}

/// Link counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub offered: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub swapped: u64,
}

/// One direction of a simulated link
#[derive(Debug, Default)]
pub struct LossyLink {
    profile: LinkProfile,
    counter: u64,
    held: Option<Bytes>,
    stats: LinkStats,
}

impl LossyLink {
    pub fn new(profile: LinkProfile) -> Self {
        LossyLink {
            profile,
            ..Self::default()
        }
    }

    /// Pass a batch of datagrams through the link
    ///
    /// A datagram held for swapping is released after the next one, or at
    /// the end of the batch.
    pub fn carry(&mut self, datagrams: impl IntoIterator<Item = Bytes>) -> Vec<Bytes> {
        let mut out = Vec::new();
        for datagram in datagrams {
            self.counter += 1;
            self.stats.offered += 1;
            let n = self.counter;

            if LinkProfile::hits(self.profile.drop_every, n) {
                self.stats.dropped += 1;
                continue;
            }
            if LinkProfile::hits(self.profile.swap_every, n) && self.held.is_none() {
                self.stats.swapped += 1;
                self.held = Some(datagram);
                continue;
            }

            if LinkProfile::hits(self.profile.duplicate_every, n) {
                self.stats.duplicated += 1;
                out.push(datagram.clone());
            }
            out.push(datagram);
            out.extend(self.held.take());
        }
        out.extend(self.held.take());

        self.stats.delivered += out.len() as u64;
        out
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }
}
