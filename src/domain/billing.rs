//! Invoice/payment reconciliation rules.
//!
//! All money is integer cents end to end; amount strings are parsed at the
//! edge and accept both '.' and ',' as the decimal separator.
//!
//! Payment declines are *outcomes*, not errors: the caller is sent back to
//! the invoice view with a reason code. Structural problems (missing
//! invoice, wrong owner, cancelled invoice) stay in the `ApiError` taxonomy.

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::InvoiceStatus;

/// Invoice status as a pure function of the payment ledger.
///
/// CANCELLED is authoritative and never overridden by payments. The
/// function is idempotent: feeding its output back with the same totals
/// yields the same status.
pub fn derive_invoice_status(
    current: InvoiceStatus,
    paid_cents: i64,
    final_cents: i64,
) -> InvoiceStatus {
    if current == InvoiceStatus::Cancelled {
        return InvoiceStatus::Cancelled;
    }
    if final_cents <= 0 || paid_cents <= 0 {
        return InvoiceStatus::Unpaid;
    }
    if paid_cents >= final_cents {
        return InvoiceStatus::Paid;
    }
    InvoiceStatus::PartiallyPaid
}

pub fn remaining_cents(final_cents: i64, paid_cents: i64) -> i64 {
    (final_cents - paid_cents).max(0)
}

/// Overdue is a derived view fact, never persisted.
pub fn is_overdue(
    due_date: Option<NaiveDate>,
    remaining_cents: i64,
    status: InvoiceStatus,
    today: NaiveDate,
) -> bool {
    match due_date {
        Some(due) => due < today && remaining_cents > 0 && status != InvoiceStatus::Cancelled,
        None => false,
    }
}

/// Parse a user-supplied amount ("12.50", "12,50", "40") into cents.
/// At most two fraction digits; anything else is rejected.
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
    let normalized = raw.trim().replace(',', ".");
    if normalized.is_empty() || normalized.starts_with('-') {
        return None;
    }

    let (whole, frac) = match normalized.split_once('.') {
        Some((w, f)) => (w, f),
        None => (normalized.as_str(), ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac_cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };

    whole.checked_mul(100)?.checked_add(frac_cents)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentDecline {
    #[error("payment amount is missing or not a positive number")]
    Amount,
    #[error("the invoice is already settled")]
    AlreadySettled,
    #[error("payment exceeds the remaining balance")]
    Overpayment,
    #[error("card number must contain exactly 16 digits")]
    CardNumber,
    #[error("card expiry must match MM/YY")]
    CardExpiry,
    #[error("card CVV must be exactly 3 digits")]
    CardCvv,
    #[error("card brand is required")]
    CardBrand,
    #[error("card authorization was declined")]
    CardAuthorization,
}

impl PaymentDecline {
    /// Stable reason code carried back to the invoice view.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentDecline::Amount => "AMOUNT",
            PaymentDecline::AlreadySettled => "ALREADY_SETTLED",
            PaymentDecline::Overpayment => "OVERPAYMENT",
            PaymentDecline::CardNumber => "CARD_NUMBER",
            PaymentDecline::CardExpiry => "CARD_EXPIRY",
            PaymentDecline::CardCvv => "CARD_CVV",
            PaymentDecline::CardBrand => "CARD_BRAND",
            PaymentDecline::CardAuthorization => "CARD_3DS",
        }
    }
}

/// Reject settled invoices and overpayments. `remaining == 0` is reported
/// separately so the caller can simply re-derive and show current state.
pub fn check_against_balance(amount_cents: i64, remaining: i64) -> Result<(), PaymentDecline> {
    if remaining <= 0 {
        return Err(PaymentDecline::AlreadySettled);
    }
    if amount_cents > remaining {
        return Err(PaymentDecline::Overpayment);
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct CardDetails {
    pub number: Option<String>,
    pub exp: Option<String>,
    pub cvv: Option<String>,
    pub brand: Option<String>,
}

/// Deterministic stand-in for card authorization; not a real gateway.
///
/// The number must normalize (non-digits stripped) to exactly 16 digits,
/// expiry is MM/YY, CVV is 3 digits, a brand label must be present. The
/// pseudo-3-D-Secure step declines any card whose last digit is odd.
pub fn validate_card(card: &CardDetails) -> Result<(), PaymentDecline> {
    let digits: String = card
        .number
        .as_deref()
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.len() != 16 {
        return Err(PaymentDecline::CardNumber);
    }

    if !is_valid_expiry(card.exp.as_deref().unwrap_or("")) {
        return Err(PaymentDecline::CardExpiry);
    }

    let cvv = card.cvv.as_deref().unwrap_or("");
    if cvv.len() != 3 || !cvv.chars().all(|c| c.is_ascii_digit()) {
        return Err(PaymentDecline::CardCvv);
    }

    if card.brand.as_deref().unwrap_or("").trim().is_empty() {
        return Err(PaymentDecline::CardBrand);
    }

    let last = digits.as_bytes()[digits.len() - 1] - b'0';
    if last % 2 != 0 {
        return Err(PaymentDecline::CardAuthorization);
    }

    Ok(())
}

/// MM/YY, month 01-12.
fn is_valid_expiry(exp: &str) -> bool {
    let bytes = exp.as_bytes();
    if bytes.len() != 5 || bytes[2] != b'/' {
        return false;
    }
    if !exp[..2].chars().all(|c| c.is_ascii_digit())
        || !exp[3..].chars().all(|c| c.is_ascii_digit())
    {
        return false;
    }
    matches!(exp[..2].parse::<u8>(), Ok(1..=12))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(number: &str, exp: &str, cvv: &str, brand: &str) -> CardDetails {
        CardDetails {
            number: Some(number.into()),
            exp: Some(exp.into()),
            cvv: Some(cvv.into()),
            brand: Some(brand.into()),
        }
    }

    #[test]
    fn derive_status_table() {
        use InvoiceStatus::*;

        assert_eq!(derive_invoice_status(Unpaid, 0, 10000), Unpaid);
        assert_eq!(derive_invoice_status(Unpaid, 6000, 10000), PartiallyPaid);
        assert_eq!(derive_invoice_status(PartiallyPaid, 10000, 10000), Paid);
        assert_eq!(derive_invoice_status(Unpaid, 12000, 10000), Paid);
        // zero-value invoices never become PAID
        assert_eq!(derive_invoice_status(Unpaid, 500, 0), Unpaid);
        // cancellation is authoritative
        assert_eq!(derive_invoice_status(Cancelled, 10000, 10000), Cancelled);
    }

    #[test]
    fn derive_status_is_idempotent() {
        use InvoiceStatus::*;

        for current in [Unpaid, PartiallyPaid, Paid, Cancelled] {
            for (paid, total) in [(0, 0), (0, 10000), (4000, 10000), (10000, 10000)] {
                let once = derive_invoice_status(current, paid, total);
                assert_eq!(derive_invoice_status(once, paid, total), once);
            }
        }
    }

    #[test]
    fn partial_then_full_payment_scenario() {
        use InvoiceStatus::*;

        let final_cents = 10000; // 100.00
        let mut status = Unpaid;
        let mut paid = 0;

        paid += 6000;
        status = derive_invoice_status(status, paid, final_cents);
        assert_eq!(status, PartiallyPaid);
        assert_eq!(remaining_cents(final_cents, paid), 4000);

        assert_eq!(check_against_balance(4000, remaining_cents(final_cents, paid)), Ok(()));
        paid += 4000;
        status = derive_invoice_status(status, paid, final_cents);
        assert_eq!(status, Paid);
        assert_eq!(remaining_cents(final_cents, paid), 0);

        // any further payment attempt bounces off the settled balance
        assert_eq!(
            check_against_balance(1, remaining_cents(final_cents, paid)),
            Err(PaymentDecline::AlreadySettled)
        );
    }

    #[test]
    fn overpayment_is_rejected_outright() {
        assert_eq!(check_against_balance(4001, 4000), Err(PaymentDecline::Overpayment));
        assert_eq!(check_against_balance(4000, 4000), Ok(()));
    }

    #[test]
    fn amount_parsing_accepts_both_separators() {
        assert_eq!(parse_amount_cents("12.50"), Some(1250));
        assert_eq!(parse_amount_cents("12,50"), Some(1250));
        assert_eq!(parse_amount_cents(" 40 "), Some(4000));
        assert_eq!(parse_amount_cents("0.5"), Some(50));
        assert_eq!(parse_amount_cents("0"), Some(0));
        assert_eq!(parse_amount_cents("12.345"), None);
        assert_eq!(parse_amount_cents("-5"), None);
        assert_eq!(parse_amount_cents("12,50,0"), None);
        assert_eq!(parse_amount_cents("abc"), None);
        assert_eq!(parse_amount_cents(""), None);
    }

    #[test]
    fn card_validation_pseudo_3ds() {
        // even last digit: accepted
        assert_eq!(validate_card(&card("4111 1111 1111 1114", "12/30", "123", "VISA")), Ok(()));
        // odd last digit: declined by the 3DS stand-in
        assert_eq!(
            validate_card(&card("4111 1111 1111 1115", "12/30", "123", "VISA")),
            Err(PaymentDecline::CardAuthorization)
        );
    }

    #[test]
    fn card_field_validation() {
        assert_eq!(
            validate_card(&card("4111", "12/30", "123", "VISA")),
            Err(PaymentDecline::CardNumber)
        );
        assert_eq!(
            validate_card(&card("4111111111111114", "13/30", "123", "VISA")),
            Err(PaymentDecline::CardExpiry)
        );
        assert_eq!(
            validate_card(&card("4111111111111114", "1/30", "123", "VISA")),
            Err(PaymentDecline::CardExpiry)
        );
        assert_eq!(
            validate_card(&card("4111111111111114", "12/30", "12", "VISA")),
            Err(PaymentDecline::CardCvv)
        );
        assert_eq!(
            validate_card(&card("4111111111111114", "12/30", "123", "  ")),
            Err(PaymentDecline::CardBrand)
        );
        assert_eq!(validate_card(&CardDetails::default()), Err(PaymentDecline::CardNumber));
    }

    #[test]
    fn overdue_is_a_view_fact() {
        let today: NaiveDate = "2031-03-10".parse().unwrap();
        let yesterday: NaiveDate = "2031-03-09".parse().unwrap();
        let tomorrow: NaiveDate = "2031-03-11".parse().unwrap();

        assert!(is_overdue(Some(yesterday), 100, InvoiceStatus::Unpaid, today));
        assert!(!is_overdue(Some(yesterday), 0, InvoiceStatus::Paid, today));
        assert!(!is_overdue(Some(yesterday), 100, InvoiceStatus::Cancelled, today));
        assert!(!is_overdue(Some(tomorrow), 100, InvoiceStatus::Unpaid, today));
        assert!(!is_overdue(Some(today), 100, InvoiceStatus::Unpaid, today));
        assert!(!is_overdue(None, 100, InvoiceStatus::Unpaid, today));
    }
}
