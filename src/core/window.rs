//! Rolling contribution window
//!
//! Tracks the coinbase recipients of the last `W` accepted blocks. Per-address
//! block counts and subsidy totals are maintained incrementally, together
//! with an ordered index on subsidy won, so tier classification and
//! beneficiary selection never rescan the window.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::address::Address;
use super::utxo::LedgerError;

/// One accepted block's credited miner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub height: u64,
    pub address: Address,
    pub subsidy: u64,
}

/// What an address won inside the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Contribution {
    pub blocks: u32,
    pub subsidy: u128,
}

#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    entries: VecDeque<WindowEntry>,
    contributions: HashMap<Address, Contribution>,
    // (subsidy won, address); the first element is the smallest contributor
    ranking: BTreeSet<(u128, Address)>,
    total_subsidy: u128,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
            contributions: HashMap::new(),
            ranking: BTreeSet::new(),
            total_subsidy: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry> {
        self.entries.iter()
    }

    pub fn total_subsidy(&self) -> u128 {
        self.total_subsidy
    }

    pub fn contribution(&self, address: &Address) -> Contribution {
        self.contributions.get(address).copied().unwrap_or_default()
    }

    /// Distinct addresses currently in the window
    pub fn contributors(&self) -> usize {
        self.contributions.len()
    }

    /// Subsidy-weighted share of the window won by `address`, in basis points
    pub fn share_bps(&self, address: &Address) -> u32 {
        if self.total_subsidy == 0 {
            return 0;
        }
        let won = self.contribution(address).subsidy;
        (won * 10_000 / self.total_subsidy) as u32
    }

    /// Smallest contributor other than `excluding`; ties go to the lowest address
    pub fn lowest_contributor(&self, excluding: &Address) -> Option<Address> {
        self.ranking
            .iter()
            .map(|(_, address)| *address)
            .find(|address| address != excluding)
    }

    /// Entry that pushing one more block would evict
    pub fn next_eviction(&self) -> Option<WindowEntry> {
        if self.entries.len() >= self.capacity {
            self.entries.front().copied()
        } else {
            None
        }
    }

    /// Append a block, evicting the oldest one when full
    pub fn push(&mut self, entry: WindowEntry) -> Option<WindowEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            self.forget(old);
        }

        self.entries.push_back(entry);
        self.record(&entry);
        evicted
    }

    /// Exact inverse of `push`
    pub fn retreat(
        &mut self,
        entry: &WindowEntry,
        evicted: Option<WindowEntry>,
    ) -> Result<(), LedgerError> {
        match self.entries.back() {
            Some(last) if last == entry => {}
            _ => return Err(LedgerError::WindowMismatch(entry.height)),
        }

        self.entries.pop_back();
        self.forget(entry);
        if let Some(old) = evicted {
            self.entries.push_front(old);
            self.record(&old);
        }
        Ok(())
    }

    fn record(&mut self, entry: &WindowEntry) {
        let contribution = self.contributions.entry(entry.address).or_default();
        if contribution.blocks > 0 {
            self.ranking.remove(&(contribution.subsidy, entry.address));
        }
        contribution.blocks += 1;
        contribution.subsidy += entry.subsidy as u128;
        self.ranking.insert((contribution.subsidy, entry.address));
        self.total_subsidy += entry.subsidy as u128;
    }

    fn forget(&mut self, entry: &WindowEntry) {
        if let Some(contribution) = self.contributions.get_mut(&entry.address) {
            self.ranking.remove(&(contribution.subsidy, entry.address));
            contribution.blocks -= 1;
            contribution.subsidy -= entry.subsidy as u128;
            if contribution.blocks == 0 {
                self.contributions.remove(&entry.address);
            } else {
                self.ranking.insert((contribution.subsidy, entry.address));
            }
        }
        self.total_subsidy -= entry.subsidy as u128;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn entry(height: u64, who: u8, subsidy: u64) -> WindowEntry {
        WindowEntry {
            height,
            address: addr(who),
            subsidy,
        }
    }

    // Straightforward rescan used as a reference
    fn rescan_share(window: &RollingWindow, address: &Address) -> u32 {
        let total: u128 = window.entries().map(|e| e.subsidy as u128).sum();
        if total == 0 {
            return 0;
        }
        let won: u128 = window
            .entries()
            .filter(|e| &e.address == address)
            .map(|e| e.subsidy as u128)
            .sum();
        (won * 10_000 / total) as u32
    }

    #[test]
    fn test_push_evicts_oldest() {
        let mut window = RollingWindow::new(3);
        assert!(window.push(entry(1, 1, 10)).is_none());
        assert!(window.push(entry(2, 2, 10)).is_none());
        assert!(window.push(entry(3, 3, 10)).is_none());
        assert_eq!(window.next_eviction(), Some(entry(1, 1, 10)));
        assert_eq!(window.push(entry(4, 4, 10)), Some(entry(1, 1, 10)));
        assert_eq!(window.len(), 3);
        assert_eq!(window.contribution(&addr(1)), Contribution::default());
        assert_eq!(window.total_subsidy(), 30);
    }

    #[test]
    fn test_share_matches_rescan() {
        let mut window = RollingWindow::new(10);
        for h in 0..25u64 {
            let who = (h % 4) as u8 + if h % 3 == 0 { 0 } else { 1 };
            window.push(entry(h, who, 50 - h));
            for a in 0..6u8 {
                assert_eq!(window.share_bps(&addr(a)), rescan_share(&window, &addr(a)));
            }
        }
    }

    #[test]
    fn test_lowest_contributor_excludes_miner() {
        let mut window = RollingWindow::new(10);
        window.push(entry(1, 1, 10));
        window.push(entry(2, 2, 10));
        window.push(entry(3, 2, 10));
        window.push(entry(4, 3, 10));

        // 1 and 3 tie at 10; lower address wins
        assert_eq!(window.lowest_contributor(&addr(9)), Some(addr(1)));
        assert_eq!(window.lowest_contributor(&addr(1)), Some(addr(3)));

        let mut solo = RollingWindow::new(10);
        solo.push(entry(1, 5, 10));
        assert_eq!(solo.lowest_contributor(&addr(5)), None);
    }

    #[test]
    fn test_retreat_restores_state() {
        let mut window = RollingWindow::new(2);
        window.push(entry(1, 1, 10));
        window.push(entry(2, 2, 20));
        let before: Vec<_> = window.entries().copied().collect();

        let pushed = entry(3, 3, 30);
        let evicted = window.push(pushed);
        window.retreat(&pushed, evicted).unwrap();

        let after: Vec<_> = window.entries().copied().collect();
        assert_eq!(before, after);
        assert_eq!(window.total_subsidy(), 30);
        assert_eq!(window.share_bps(&addr(1)), 3333);
        assert_eq!(window.lowest_contributor(&addr(9)), Some(addr(1)));
    }

    #[test]
    fn test_retreat_rejects_wrong_entry() {
        let mut window = RollingWindow::new(2);
        window.push(entry(1, 1, 10));
        assert!(matches!(
            window.retreat(&entry(7, 1, 10), None),
            Err(LedgerError::WindowMismatch(7))
        ));
    }

    #[test]
    fn test_empty_window_share_is_zero() {
        let window = RollingWindow::new(5);
        assert_eq!(window.share_bps(&addr(1)), 0);
        assert!(window.is_empty());
        assert_eq!(window.lowest_contributor(&addr(1)), None);
    }
}
