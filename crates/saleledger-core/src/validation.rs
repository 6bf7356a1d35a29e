//! # Validation Module
//!
//! Input rules checked before any state is touched.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: THIS MODULE                                                   │
//! │  ├── quantities, amounts, references, addresses                        │
//! │  └── line item normalisation (duplicate products merged)               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Engine (catalog + stock read, fail-fast, no mutation)         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                        │
//! │  ├── CHECK (quantity >= 0), CHECK (amount_cents > 0)                    │
//! │  └── UNIQUE (external_ref)                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::LineRequest;
use crate::{
    ADDRESS_MAX_LEN, DESCRIPTION_MAX_LEN, ERROR_CODE_MAX_LEN, EXTERNAL_REF_MAX_LEN,
    MAX_ITEM_QUANTITY, MAX_LINE_ITEMS,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Quantities & Amounts
// =============================================================================

/// Quantity must be in `1..=MAX_ITEM_QUANTITY`.
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity < 1 || quantity > MAX_ITEM_QUANTITY {
        return Err(ValidationError::InvalidQuantity {
            quantity,
            max: MAX_ITEM_QUANTITY,
        });
    }
    Ok(())
}

/// Payment amounts are strictly positive.
pub fn validate_payment_amount(amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::NonPositiveAmount(amount));
    }
    Ok(())
}

/// Validates and normalises checkout lines.
///
/// ## Rules
/// - At least one line, at most [`MAX_LINE_ITEMS`]
/// - Each quantity within bounds
/// - Lines for the same product are merged (first occurrence keeps its
///   position), and the merged quantity is re-checked
///
/// ## Example
/// ```rust
/// use saleledger_core::types::LineRequest;
/// use saleledger_core::validation::normalize_line_items;
///
/// let lines = normalize_line_items(&[
///     LineRequest::new(1, 2),
///     LineRequest::new(2, 1),
///     LineRequest::new(1, 3),
/// ]).unwrap();
/// assert_eq!(lines, vec![LineRequest::new(1, 5), LineRequest::new(2, 1)]);
/// ```
pub fn normalize_line_items(items: &[LineRequest]) -> ValidationResult<Vec<LineRequest>> {
    if items.is_empty() {
        return Err(ValidationError::EmptySale);
    }

    let mut merged: Vec<LineRequest> = Vec::with_capacity(items.len());
    for item in items {
        validate_quantity(item.quantity)?;
        match merged.iter_mut().find(|m| m.product_id == item.product_id) {
            Some(existing) => {
                existing.quantity += item.quantity;
                validate_quantity(existing.quantity)?;
            }
            None => merged.push(*item),
        }
    }

    if merged.len() > MAX_LINE_ITEMS {
        return Err(ValidationError::TooManyLineItems {
            max: MAX_LINE_ITEMS,
            actual: merged.len(),
        });
    }

    Ok(merged)
}

// =============================================================================
// String Validators
// =============================================================================

/// External references are opaque provider ids: non-empty, no whitespace.
pub fn validate_external_ref(reference: &str) -> ValidationResult<()> {
    if reference.is_empty() {
        return Err(ValidationError::Required {
            field: "external_ref",
        });
    }
    if reference.len() > EXTERNAL_REF_MAX_LEN {
        return Err(ValidationError::TooLong {
            field: "external_ref",
            max: EXTERNAL_REF_MAX_LEN,
        });
    }
    if reference.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "external_ref",
            reason: "must not contain whitespace",
        });
    }
    Ok(())
}

pub fn validate_address(address: &str) -> ValidationResult<()> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ValidationError::Required {
            field: "shipping address",
        });
    }
    if address.chars().count() > ADDRESS_MAX_LEN {
        return Err(ValidationError::TooLong {
            field: "shipping address",
            max: ADDRESS_MAX_LEN,
        });
    }
    Ok(())
}

pub fn validate_description(description: &str) -> ValidationResult<()> {
    if description.chars().count() > DESCRIPTION_MAX_LEN {
        return Err(ValidationError::TooLong {
            field: "description",
            max: DESCRIPTION_MAX_LEN,
        });
    }
    Ok(())
}

// =============================================================================
// Normalisers
// =============================================================================

/// Cuts a provider error code to the stored column width.
///
/// Counts characters, not bytes, so a multi-byte code is never split.
pub fn truncate_error_code(code: &str) -> String {
    code.trim().chars().take(ERROR_CODE_MAX_LEN).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_bounds() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_ITEM_QUANTITY).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-2).is_err());
        assert!(validate_quantity(MAX_ITEM_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_empty_sale_rejected() {
        assert_eq!(normalize_line_items(&[]), Err(ValidationError::EmptySale));
    }

    #[test]
    fn test_merged_quantity_rechecked() {
        let result = normalize_line_items(&[
            LineRequest::new(1, MAX_ITEM_QUANTITY),
            LineRequest::new(1, 1),
        ]);
        assert!(matches!(
            result,
            Err(ValidationError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn test_payment_amount() {
        assert!(validate_payment_amount(Money::from_cents(1)).is_ok());
        assert!(validate_payment_amount(Money::zero()).is_err());
        assert!(validate_payment_amount(Money::from_cents(-100)).is_err());
    }

    #[test]
    fn test_external_ref() {
        assert!(validate_external_ref("pi_3NqY0a2eZvKYlo2C").is_ok());
        assert!(validate_external_ref("").is_err());
        assert!(validate_external_ref("pi 123").is_err());
        assert!(validate_external_ref(&"x".repeat(EXTERNAL_REF_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_truncate_error_code() {
        let long = "card_declined_".repeat(10);
        let truncated = truncate_error_code(&long);
        assert_eq!(truncated.chars().count(), ERROR_CODE_MAX_LEN);
        assert_eq!(truncate_error_code("  expired_card "), "expired_card");

        let accented = "é".repeat(ERROR_CODE_MAX_LEN + 5);
        assert_eq!(truncate_error_code(&accented).chars().count(), ERROR_CODE_MAX_LEN);
    }

    #[test]
    fn test_address() {
        assert!(validate_address("Av. Siempre Viva 742").is_ok());
        assert!(validate_address("   ").is_err());
    }
}
