//! Resource ledger: non-negative quantity per resource.
//!
//! The ledger never goes negative. A debit that would overdraw fails and
//! leaves the ledger untouched, and [`ResourceLedger::debit_all`] applies a
//! whole list atomically or not at all.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;
use crate::id::ResourceId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient {resource:?}: requested {requested}, available {available}")]
    Insufficient {
        resource: ResourceId,
        requested: Fixed64,
        available: Fixed64,
    },
    #[error("negative amount {amount} for {resource:?}")]
    NegativeAmount { resource: ResourceId, amount: Fixed64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLedger {
    quantities: BTreeMap<ResourceId, Fixed64>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current quantity; zero for resources never credited.
    pub fn quantity(&self, resource: ResourceId) -> Fixed64 {
        self.quantities
            .get(&resource)
            .copied()
            .unwrap_or(Fixed64::ZERO)
    }

    /// Add `amount`. Saturates at `Fixed64::MAX`.
    pub fn credit(&mut self, resource: ResourceId, amount: Fixed64) -> Result<(), LedgerError> {
        if amount < Fixed64::ZERO {
            return Err(LedgerError::NegativeAmount { resource, amount });
        }
        let entry = self.quantities.entry(resource).or_insert(Fixed64::ZERO);
        *entry = entry.saturating_add(amount);
        Ok(())
    }

    /// Remove `amount`, failing without mutation if it would overdraw.
    pub fn debit(&mut self, resource: ResourceId, amount: Fixed64) -> Result<(), LedgerError> {
        if amount < Fixed64::ZERO {
            return Err(LedgerError::NegativeAmount { resource, amount });
        }
        let available = self.quantity(resource);
        if available < amount {
            return Err(LedgerError::Insufficient {
                resource,
                requested: amount,
                available,
            });
        }
        self.quantities.insert(resource, available - amount);
        Ok(())
    }

    /// Whether every `(resource, amount)` is available at once. Repeated
    /// resources are summed.
    pub fn has_all(&self, requirements: &[(ResourceId, Fixed64)]) -> bool {
        self.first_shortfall(requirements).is_none()
    }

    /// Debit every entry or none of them.
    pub fn debit_all(&mut self, requirements: &[(ResourceId, Fixed64)]) -> Result<(), LedgerError> {
        if let Some(err) = self.first_shortfall(requirements) {
            return Err(err);
        }
        for (resource, amount) in requirements {
            let current = self.quantity(*resource);
            self.quantities.insert(*resource, current - *amount);
        }
        Ok(())
    }

    fn first_shortfall(&self, requirements: &[(ResourceId, Fixed64)]) -> Option<LedgerError> {
        let mut totals: BTreeMap<ResourceId, Fixed64> = BTreeMap::new();
        for (resource, amount) in requirements {
            if *amount < Fixed64::ZERO {
                return Some(LedgerError::NegativeAmount {
                    resource: *resource,
                    amount: *amount,
                });
            }
            let total = totals.entry(*resource).or_insert(Fixed64::ZERO);
            *total = total.saturating_add(*amount);
        }
        totals.into_iter().find_map(|(resource, requested)| {
            let available = self.quantity(resource);
            (available < requested).then_some(LedgerError::Insufficient {
                resource,
                requested,
                available,
            })
        })
    }

    /// Non-zero balances in resource id order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, Fixed64)> + '_ {
        self.quantities
            .iter()
            .filter(|(_, q)| **q > Fixed64::ZERO)
            .map(|(r, q)| (*r, *q))
    }

    /// Copy of every non-zero balance.
    pub fn snapshot(&self) -> BTreeMap<ResourceId, Fixed64> {
        self.iter().collect()
    }
}
