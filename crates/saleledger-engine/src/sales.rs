//! # Sale Aggregate
//!
//! Checkout, reversal and settlement confirmation for sales.
//!
//! ## Checkout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. VALIDATE (no transaction, no mutation)                              │
//! │     normalise lines → product exists → active → stock sufficient        │
//! │     any failure: return before anything is reserved                     │
//! │                                                                         │
//! │  2. ONE TRANSACTION                                                     │
//! │     reserve stock per line (conditional decrement, takes write lock)    │
//! │     [consume lots FEFO]          when inventory.consume_lots            │
//! │     insert sale + line items (unit price snapshot)                      │
//! │     in person: COMPLETED payment for the total                          │
//! │     online:    shipment + PENDING card payment for the total            │
//! │     COMMIT                                                              │
//! │                                                                         │
//! │  3. AUDIT (after commit, failures swallowed)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Step 1 only gives a fast, friendly error. Step 2 re-checks every line
//! under the write lock, so a concurrent sale that wins the last unit
//! between the two steps still turns this one into `InsufficientStock`.

use serde::Serialize;
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use saleledger_core::validation::{normalize_line_items, validate_address};
use saleledger_core::{
    CoreError, LineRequest, Money, PaymentMethod, PaymentState, PaymentTransaction, Sale,
    SaleChannel, SaleLineItem, SaleStatus, Shipment, ValidationError,
};
use saleledger_db::{
    Database, NewLineItem, NewSale, NewTransaction, PaymentRepository, SaleRepository,
    ShipmentRepository,
};

use crate::audit::{AuditAction, AuditContext, AuditEntity, AuditEvent, Auditor};
use crate::error::EngineResult;
use crate::lots::LotAllocator;
use crate::stock::StockLedger;

// =============================================================================
// Requests & Results
// =============================================================================

/// Sale rung up at the register.
#[derive(Debug, Clone)]
pub struct InPersonCheckout {
    pub buyer_id: Option<i64>,
    pub seller_id: i64,
    pub method: PaymentMethod,
    pub promotion_id: Option<i64>,
    pub items: Vec<LineRequest>,
}

/// Sale placed through the online store.
#[derive(Debug, Clone)]
pub struct OnlineCheckout {
    pub buyer_id: i64,
    pub address: String,
    pub promotion_id: Option<i64>,
    pub items: Vec<LineRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResult {
    pub sale: Sale,
    pub items: Vec<SaleLineItem>,
    /// The payment recorded (in person) or opened (online) with the sale.
    /// None for a zero total.
    pub transaction: Option<PaymentTransaction>,
    pub shipment: Option<Shipment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleDetail {
    pub sale: Sale,
    pub items: Vec<SaleLineItem>,
}

/// What a settlement check found.
#[derive(Debug, Clone)]
pub enum SettlementCheck {
    /// This call moved the sale PENDING → COMPLETED.
    Completed(Sale),
    AlreadyCompleted,
    /// Completed payments do not cover the total yet.
    Outstanding { remaining: Money },
    /// Cancelled or voided; never resurrected.
    Reversed,
}

// =============================================================================
// Service
// =============================================================================

#[derive(Debug, Clone)]
pub struct SaleService {
    db: Database,
    auditor: Auditor,
    consume_lots: bool,
}

impl SaleService {
    pub fn new(db: Database, auditor: Auditor, consume_lots: bool) -> Self {
        SaleService {
            db,
            auditor,
            consume_lots,
        }
    }

    /// Creates a sale settled on the spot.
    pub async fn create_in_person(
        &self,
        checkout: InPersonCheckout,
        ctx: &AuditContext,
    ) -> EngineResult<CheckoutResult> {
        let (lines, total) = self.price_lines(&checkout.items).await?;

        let mut tx = self.db.begin().await?;
        self.reserve_lines_in(&mut tx, &lines).await?;

        let header = NewSale {
            channel: SaleChannel::InPerson,
            status: SaleStatus::Completed,
            total_cents: total.cents(),
            buyer_id: checkout.buyer_id,
            seller_id: Some(checkout.seller_id),
            promotion_id: checkout.promotion_id,
        };
        let (sale, items) = insert_sale_in(&mut tx, &header, &lines).await?;

        let transaction = if total.is_positive() {
            let payment = NewTransaction {
                sale_id: sale.id,
                method: checkout.method,
                amount_cents: total.cents(),
                state: PaymentState::Completed,
                external_ref: None,
                description: format!("In-person sale #{}", sale.id),
                processor_id: Some(checkout.seller_id),
            };
            Some(PaymentRepository::insert(&mut tx, &payment).await?)
        } else {
            None
        };

        tx.commit().await?;

        info!(
            sale_id = sale.id,
            total = %total,
            lines = items.len(),
            method = checkout.method.as_str(),
            "In-person sale completed"
        );
        self.auditor.emit(sale_created_event(&sale, ctx));

        Ok(CheckoutResult {
            sale,
            items,
            transaction,
            shipment: None,
        })
    }

    /// Creates a sale awaiting payment, with its shipment and the first
    /// PENDING card transaction for the full total.
    ///
    /// A zero total has nothing to pay and is created COMPLETED.
    pub async fn create_online(
        &self,
        checkout: OnlineCheckout,
        ctx: &AuditContext,
    ) -> EngineResult<CheckoutResult> {
        validate_address(&checkout.address)?;
        let (lines, total) = self.price_lines(&checkout.items).await?;

        let status = if total.is_zero() {
            SaleStatus::Completed
        } else {
            SaleStatus::Pending
        };

        let mut tx = self.db.begin().await?;
        self.reserve_lines_in(&mut tx, &lines).await?;

        let header = NewSale {
            channel: SaleChannel::Online,
            status,
            total_cents: total.cents(),
            buyer_id: Some(checkout.buyer_id),
            seller_id: None,
            promotion_id: checkout.promotion_id,
        };
        let (mut sale, items) = insert_sale_in(&mut tx, &header, &lines).await?;

        let shipment = ShipmentRepository::insert(&mut tx, sale.id, checkout.address.trim()).await?;
        SaleRepository::set_shipment(&mut tx, sale.id, shipment.id).await?;
        sale.shipment_id = Some(shipment.id);

        let transaction = if total.is_positive() {
            let payment = NewTransaction {
                sale_id: sale.id,
                method: PaymentMethod::Card,
                amount_cents: total.cents(),
                state: PaymentState::Pending,
                external_ref: None,
                description: format!("Online sale #{}", sale.id),
                processor_id: None,
            };
            Some(PaymentRepository::insert(&mut tx, &payment).await?)
        } else {
            None
        };

        tx.commit().await?;

        info!(
            sale_id = sale.id,
            total = %total,
            lines = items.len(),
            shipment_id = shipment.id,
            "Online sale created"
        );
        self.auditor.emit(sale_created_event(&sale, ctx));

        Ok(CheckoutResult {
            sale,
            items,
            transaction,
            shipment: Some(shipment),
        })
    }

    /// PENDING or COMPLETED → CANCELLED, returning stock.
    pub async fn cancel(&self, sale_id: i64, ctx: &AuditContext) -> EngineResult<Sale> {
        self.reverse(sale_id, SaleStatus::Cancelled, ctx).await
    }

    /// PENDING or COMPLETED → VOIDED, returning stock.
    pub async fn void(&self, sale_id: i64, ctx: &AuditContext) -> EngineResult<Sale> {
        self.reverse(sale_id, SaleStatus::Voided, ctx).await
    }

    /// PENDING → COMPLETED once completed payments cover the total.
    ///
    /// Safe to call any number of times.
    pub async fn confirm_settlement(&self, sale_id: i64) -> EngineResult<SettlementCheck> {
        let mut tx = self.db.begin().await?;
        if !SaleRepository::touch(&mut tx, sale_id).await? {
            return Err(CoreError::SaleNotFound(sale_id).into());
        }
        let check = confirm_settlement_in(&mut tx, sale_id).await?;
        tx.commit().await?;

        if let SettlementCheck::Completed(sale) = &check {
            self.auditor
                .emit(sale_completed_event(sale, &AuditContext::system()));
        }
        Ok(check)
    }

    /// Sale with its line items.
    pub async fn get(&self, sale_id: i64) -> EngineResult<SaleDetail> {
        let sale = self
            .db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or(CoreError::SaleNotFound(sale_id))?;
        let items = self.db.sales().line_items(sale_id).await?;
        Ok(SaleDetail { sale, items })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Fail-fast pass: every line is checked before anything is reserved.
    async fn price_lines(&self, requested: &[LineRequest]) -> EngineResult<(Vec<NewLineItem>, Money)> {
        let lines = normalize_line_items(requested)?;

        let mut priced = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = self
                .db
                .products()
                .get_by_id(line.product_id)
                .await?
                .ok_or(CoreError::ProductNotFound(line.product_id))?;

            if !product.is_active {
                return Err(CoreError::ProductInactive(product.id).into());
            }

            let available = self
                .db
                .stock()
                .get(product.id)
                .await?
                .map(|level| level.quantity)
                .unwrap_or(0);
            if available < line.quantity {
                return Err(CoreError::InsufficientStock {
                    product_id: product.id,
                    available,
                    requested: line.quantity,
                }
                .into());
            }

            let subtotal = product
                .price()
                .multiply_quantity(line.quantity)
                .ok_or(ValidationError::InvalidFormat {
                    field: "subtotal",
                    reason: "amount overflow",
                })?;

            priced.push(NewLineItem {
                product_id: product.id,
                quantity: line.quantity,
                unit_price_cents: product.price_cents,
                subtotal_cents: subtotal.cents(),
            });
        }

        let total = Money::checked_sum(priced.iter().map(|l| Money::from_cents(l.subtotal_cents)))
            .ok_or(ValidationError::InvalidFormat {
                field: "total",
                reason: "amount overflow",
            })?;

        Ok((priced, total))
    }

    async fn reserve_lines_in(
        &self,
        conn: &mut SqliteConnection,
        lines: &[NewLineItem],
    ) -> EngineResult<()> {
        for line in lines {
            StockLedger::reserve_in(conn, line.product_id, line.quantity).await?;
            if self.consume_lots {
                LotAllocator::consume_in(conn, line.product_id, line.quantity).await?;
            }
        }
        Ok(())
    }

    async fn reverse(
        &self,
        sale_id: i64,
        target: SaleStatus,
        ctx: &AuditContext,
    ) -> EngineResult<Sale> {
        let action = match target {
            SaleStatus::Voided => "void",
            _ => "cancel",
        };

        let mut tx = self.db.begin().await?;
        if !SaleRepository::touch(&mut tx, sale_id).await? {
            return Err(CoreError::SaleNotFound(sale_id).into());
        }

        let before = SaleRepository::get_in(&mut tx, sale_id)
            .await?
            .ok_or(CoreError::SaleNotFound(sale_id))?;

        if !before.status.can_reverse()
            || !SaleRepository::set_status_from(&mut tx, sale_id, before.status, target).await?
        {
            return Err(CoreError::InvalidSaleState {
                sale_id,
                current: before.status,
                action,
            }
            .into());
        }

        let items = SaleRepository::line_items_in(&mut tx, sale_id).await?;
        for item in &items {
            StockLedger::release_in(&mut tx, item.product_id, item.quantity).await?;
        }

        let cancelled_payments = PaymentRepository::cancel_pending_for_sale(&mut tx, sale_id).await?;

        let after = SaleRepository::get_in(&mut tx, sale_id)
            .await?
            .ok_or(CoreError::SaleNotFound(sale_id))?;

        tx.commit().await?;

        info!(
            sale_id,
            from = %before.status,
            to = %after.status,
            lines_released = items.len(),
            payments_cancelled = cancelled_payments.len(),
            "Sale reversed"
        );

        let sale_action = match target {
            SaleStatus::Voided => AuditAction::SaleVoided,
            _ => AuditAction::SaleCancelled,
        };
        self.auditor.emit(AuditEvent::new(
            sale_action,
            AuditEntity::Sale,
            sale_id,
            ctx,
            Some(json!({ "status": before.status })),
            Some(json!({ "status": after.status })),
        ));
        for transaction_id in cancelled_payments {
            self.auditor.emit(AuditEvent::new(
                AuditAction::PaymentCancelled,
                AuditEntity::PaymentTransaction,
                transaction_id,
                ctx,
                Some(json!({ "state": PaymentState::Pending })),
                Some(json!({ "state": PaymentState::Cancelled })),
            ));
        }

        Ok(after)
    }
}

// =============================================================================
// Shared with the payment ledger
// =============================================================================

async fn insert_sale_in(
    conn: &mut SqliteConnection,
    header: &NewSale,
    lines: &[NewLineItem],
) -> EngineResult<(Sale, Vec<SaleLineItem>)> {
    let sale = SaleRepository::insert(conn, header).await?;
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        items.push(SaleRepository::insert_line_item(conn, sale.id, line).await?);
    }
    Ok((sale, items))
}

/// Settlement check inside a transaction that already holds the write lock.
pub(crate) async fn confirm_settlement_in(
    conn: &mut SqliteConnection,
    sale_id: i64,
) -> EngineResult<SettlementCheck> {
    let sale = SaleRepository::get_in(conn, sale_id)
        .await?
        .ok_or(CoreError::SaleNotFound(sale_id))?;

    match sale.status {
        SaleStatus::Completed => return Ok(SettlementCheck::AlreadyCompleted),
        SaleStatus::Cancelled | SaleStatus::Voided => {
            warn!(
                sale_id,
                status = %sale.status,
                "Payment settled on a reversed sale; sale left as is"
            );
            return Ok(SettlementCheck::Reversed);
        }
        SaleStatus::Pending => {}
    }

    let (paid_cents, _) = PaymentRepository::totals_in(conn, sale_id).await?;
    let paid = Money::from_cents(paid_cents);
    if paid < sale.total() {
        return Ok(SettlementCheck::Outstanding {
            remaining: sale.total().remaining_after(paid),
        });
    }

    if !SaleRepository::set_status_from(conn, sale_id, SaleStatus::Pending, SaleStatus::Completed)
        .await?
    {
        return Ok(SettlementCheck::AlreadyCompleted);
    }

    let completed = SaleRepository::get_in(conn, sale_id)
        .await?
        .ok_or(CoreError::SaleNotFound(sale_id))?;
    info!(sale_id, total = %completed.total(), paid = %paid, "Sale fully paid");
    Ok(SettlementCheck::Completed(completed))
}

fn sale_created_event(sale: &Sale, ctx: &AuditContext) -> AuditEvent {
    AuditEvent::new(
        AuditAction::SaleCreated,
        AuditEntity::Sale,
        sale.id,
        ctx,
        None,
        Some(json!({
            "status": sale.status,
            "channel": sale.channel,
            "total_cents": sale.total_cents,
        })),
    )
}

pub(crate) fn sale_completed_event(sale: &Sale, ctx: &AuditContext) -> AuditEvent {
    AuditEvent::new(
        AuditAction::SaleCompleted,
        AuditEntity::Sale,
        sale.id,
        ctx,
        Some(json!({ "status": SaleStatus::Pending })),
        Some(json!({ "status": sale.status })),
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
