//! # Lot Allocation
//!
//! First-expired-first-out selection of lots for one product.
//!
//! ## Algorithm
//! ```text
//!  lots for product (on_hand > 0)
//!       │
//!       ▼
//!  sort by (expiry ASC, undated last, id ASC)
//!       │
//!       ▼
//!  total on hand < requested? ──yes──► InsufficientLotQuantity (nothing taken)
//!       │ no
//!       ▼
//!  take min(on_hand, still_needed) from each lot until satisfied
//! ```
//!
//! The plan is pure data; applying it is the database layer's job and must
//! be all-or-nothing.

use std::cmp::Ordering;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{Lot, LotAllocation};

/// Plans which lots cover `quantity` units of `product_id`.
///
/// Lots belonging to other products or with no stock are ignored. Taken
/// quantities always sum to exactly `quantity`.
pub fn allocate(product_id: i64, lots: &[Lot], quantity: i64) -> CoreResult<Vec<LotAllocation>> {
    if quantity < 1 {
        return Err(ValidationError::InvalidQuantity {
            quantity,
            max: i64::MAX,
        }
        .into());
    }

    let mut candidates: Vec<&Lot> = lots
        .iter()
        .filter(|lot| lot.product_id == product_id && lot.quantity > 0)
        .collect();
    candidates.sort_by(|a, b| fefo_order(a, b));

    let available: i64 = candidates.iter().map(|lot| lot.quantity).sum();
    if available < quantity {
        return Err(CoreError::InsufficientLotQuantity {
            product_id,
            available,
            requested: quantity,
        });
    }

    let mut still_needed = quantity;
    let mut plan = Vec::new();
    for lot in candidates {
        if still_needed == 0 {
            break;
        }
        let taken = lot.quantity.min(still_needed);
        plan.push(LotAllocation {
            lot_id: lot.id,
            quantity: taken,
        });
        still_needed -= taken;
    }

    Ok(plan)
}

/// Earliest expiry first; undated lots after all dated ones; id breaks ties.
fn fefo_order(a: &Lot, b: &Lot) -> Ordering {
    let by_expiry = match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_expiry.then(a.id.cmp(&b.id))
}

// =============================================================================
// Unit Tests
// =============================================================================
