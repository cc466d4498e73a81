//! Likely-duplicate sale detection.
//!
//! Two sales are duplicates when they belong to the same client, neither is
//! cancelled, their fingerprints match and they were created within the
//! window of each other. Detection sorts by `(client, created_at)` and only
//! compares a sale with the following sales of the same client still inside
//! the window.

use chrono::Duration;
use serde::Serialize;

use pelleterp_core::Money;
use pelleterp_inventory::StockId;
use pelleterp_parties::ClientId;

use crate::sale::{Sale, SaleId};

/// Sale total plus the sorted multiset of `(stock, quantity, unit price)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    total: Money,
    lines: Vec<(StockId, i64, Money)>,
}

impl Fingerprint {
    pub fn of(sale: &Sale) -> Self {
        let mut lines: Vec<_> = sale
            .lines()
            .iter()
            .map(|l| (l.stock_id, l.quantity, l.unit_price))
            .collect();
        lines.sort();
        Self {
            total: sale.total(),
            lines,
        }
    }
}

/// A set of duplicated sales; `keeper` is the earliest one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub client_id: ClientId,
    pub total: Money,
    pub keeper: SaleId,
    pub duplicates: Vec<SaleId>,
}

pub fn find_duplicates(sales: &[Sale], window: Duration) -> Vec<DuplicateGroup> {
    let mut live: Vec<&Sale> = sales.iter().filter(|s| !s.is_cancelled()).collect();
    live.sort_by(|a, b| {
        (a.client_id, a.created_at, a.id).cmp(&(b.client_id, b.created_at, b.id))
    });
    let prints: Vec<Fingerprint> = live.iter().map(|s| Fingerprint::of(s)).collect();

    let mut claimed = vec![false; live.len()];
    let mut groups = Vec::new();
    for i in 0..live.len() {
        if claimed[i] {
            continue;
        }
        let keeper = live[i];
        let mut duplicates = Vec::new();
        for j in (i + 1)..live.len() {
            let other = live[j];
            if other.client_id != keeper.client_id
                || other.created_at - keeper.created_at > window
            {
                break;
            }
            if !claimed[j] && prints[j] == prints[i] {
                claimed[j] = true;
                duplicates.push(other.id);
            }
        }
        if !duplicates.is_empty() {
            groups.push(DuplicateGroup {
                client_id: keeper.client_id,
                total: keeper.total(),
                keeper: keeper.id,
                duplicates,
            });
        }
    }
    groups
}

/// Existing sale that `candidate` would duplicate, if any.
pub fn likely_duplicate_of<'a>(
    candidate: &Sale,
    existing: impl IntoIterator<Item = &'a Sale>,
    window: Duration,
) -> Option<SaleId> {
    let print = Fingerprint::of(candidate);
    existing
        .into_iter()
        .filter(|s| s.id != candidate.id && s.client_id == candidate.client_id)
        .filter(|s| !s.is_cancelled())
        .filter(|s| (candidate.created_at - s.created_at).abs() <= window)
        .find(|s| Fingerprint::of(s) == print)
        .map(|s| s.id)
}
