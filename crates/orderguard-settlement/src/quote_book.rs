//! Issued insurance quotes and their single-use redemption.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use orderguard_types::{InsuranceQuote, OrderId, OrderguardError, QuoteId, Result};

#[derive(Debug, Clone)]
struct BookedQuote {
    quote: InsuranceQuote,
    redeemed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct QuoteBook {
    quotes: DashMap<QuoteId, BookedQuote>,
}

impl QuoteBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, quote: InsuranceQuote) {
        self.quotes.insert(
            quote.quote_id,
            BookedQuote {
                quote,
                redeemed_at: None,
            },
        );
    }

    #[must_use]
    pub fn get(&self, quote_id: QuoteId) -> Option<InsuranceQuote> {
        self.quotes.get(&quote_id).map(|b| b.quote.clone())
    }

    /// Would [`QuoteBook::redeem`] succeed right now?
    pub fn check(&self, quote_id: QuoteId, order_id: OrderId, now: DateTime<Utc>) -> Result<InsuranceQuote> {
        let booked = self
            .quotes
            .get(&quote_id)
            .ok_or(OrderguardError::QuoteNotFound(quote_id))?;
        Self::redeemable(&booked, order_id, now)?;
        Ok(booked.quote.clone())
    }

    /// Mark the quote used. A quote redeems at most once, for its own order,
    /// while `now <= valid_until`.
    ///
    /// # Errors
    /// `QuoteNotFound`, `InvalidRequest` (other order), `QuoteAlreadyRedeemed`
    /// or `StaleQuote`, checked in that order.
    pub fn redeem(&self, quote_id: QuoteId, order_id: OrderId, now: DateTime<Utc>) -> Result<InsuranceQuote> {
        let mut booked = self
            .quotes
            .get_mut(&quote_id)
            .ok_or(OrderguardError::QuoteNotFound(quote_id))?;
        Self::redeemable(&booked, order_id, now)?;
        booked.redeemed_at = Some(now);
        tracing::info!(
            quote_id = %quote_id,
            order_id = %order_id,
            tier = %booked.quote.tier,
            premium = %booked.quote.premium,
            "Quote redeemed"
        );
        Ok(booked.quote.clone())
    }

    /// Undo a redemption whose lock did not go through.
    pub fn reinstate(&self, quote_id: QuoteId) {
        if let Some(mut booked) = self.quotes.get_mut(&quote_id) {
            booked.redeemed_at = None;
            tracing::debug!(quote_id = %quote_id, "Quote redemption rolled back");
        }
    }

    #[must_use]
    pub fn is_redeemed(&self, quote_id: QuoteId) -> bool {
        self.quotes
            .get(&quote_id)
            .is_some_and(|b| b.redeemed_at.is_some())
    }

    /// Drop quotes past their validity, redeemed or not. The lock keeps the
    /// tier it bought; a purged quote can no longer be redeemed either way.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.quotes.len();
        self.quotes.retain(|_, b| b.quote.is_valid_at(now));
        let purged = before.saturating_sub(self.quotes.len());
        if purged > 0 {
            tracing::debug!(purged, "Stale quotes purged");
        }
        purged
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    fn redeemable(booked: &BookedQuote, order_id: OrderId, now: DateTime<Utc>) -> Result<()> {
        let quote = &booked.quote;
        if quote.order_id != order_id {
            return Err(OrderguardError::InvalidRequest {
                reason: format!("quote {} was issued for order {}", quote.quote_id, quote.order_id),
            });
        }
        if booked.redeemed_at.is_some() {
            return Err(OrderguardError::QuoteAlreadyRedeemed(quote.quote_id));
        }
        if !quote.is_valid_at(now) {
            return Err(OrderguardError::StaleQuote {
                quote_id: quote.quote_id,
                valid_until: quote.valid_until,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use orderguard_types::{InsuranceTier, RiskGrade};
    use rust_decimal::Decimal;

    fn quote(order_id: OrderId, issued_at: DateTime<Utc>) -> InsuranceQuote {
        InsuranceQuote {
            quote_id: QuoteId::new(),
            order_id,
            tier: InsuranceTier::Basic,
            coverage: Decimal::new(50, 2),
            risk_grade: RiskGrade::Low,
            risk_multiplier: Decimal::ONE,
            base_premium: Decimal::new(50, 0),
            premium: Decimal::new(50, 0),
            escrow_required: None,
            discounts: Vec::new(),
            issued_at,
            valid_until: issued_at + Duration::minutes(15),
        }
    }

    #[test]
    fn redeems_once() {
        let book = QuoteBook::new();
        let now = Utc::now();
        let order = OrderId::new();
        let q = quote(order, now);
        let id = q.quote_id;
        book.insert(q);
        assert!(book.redeem(id, order, now).is_ok());
        assert!(book.is_redeemed(id));
        assert!(matches!(
            book.redeem(id, order, now),
            Err(OrderguardError::QuoteAlreadyRedeemed(_))
        ));
    }

    #[test]
    fn stale_quote_rejected() {
        let book = QuoteBook::new();
        let now = Utc::now();
        let order = OrderId::new();
        let q = quote(order, now);
        let id = q.quote_id;
        book.insert(q);
        assert!(book.check(id, order, now + Duration::minutes(15)).is_ok());
        assert!(matches!(
            book.redeem(id, order, now + Duration::minutes(16)),
            Err(OrderguardError::StaleQuote { .. })
        ));
        assert!(!book.is_redeemed(id));
    }

    #[test]
    fn wrong_order_and_unknown_quote() {
        let book = QuoteBook::new();
        let now = Utc::now();
        let q = quote(OrderId::new(), now);
        let id = q.quote_id;
        book.insert(q);
        assert!(book.redeem(id, OrderId::new(), now).unwrap_err().is_validation());
        assert!(matches!(
            book.redeem(QuoteId::new(), OrderId::new(), now),
            Err(OrderguardError::QuoteNotFound(_))
        ));
    }

    #[test]
    fn reinstate_allows_second_redemption() {
        let book = QuoteBook::new();
        let now = Utc::now();
        let order = OrderId::new();
        let q = quote(order, now);
        let id = q.quote_id;
        book.insert(q);
        book.redeem(id, order, now).unwrap();
        book.reinstate(id);
        assert!(book.redeem(id, order, now).is_ok());
    }

    #[test]
    fn purge_drops_expired_quotes_redeemed_or_not() {
        let book = QuoteBook::new();
        let now = Utc::now();
        let redeemed = quote(OrderId::new(), now);
        let stale = quote(OrderId::new(), now);
        let live = quote(OrderId::new(), now + Duration::minutes(50));
        let (rid, rorder, live_id) = (redeemed.quote_id, redeemed.order_id, live.quote_id);
        book.insert(redeemed);
        book.insert(stale);
        book.insert(live);
        book.redeem(rid, rorder, now).unwrap();

        assert_eq!(book.purge_expired(now + Duration::minutes(15)), 0);
        assert_eq!(book.purge_expired(now + Duration::hours(1)), 2);
        assert_eq!(book.len(), 1);
        assert!(book.get(rid).is_none());
        assert!(book.get(live_id).is_some());
    }
}
