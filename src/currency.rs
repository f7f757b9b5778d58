//! Currency display and cost aggregation. Currency codes are opaque,
//! case-sensitive strings; nothing here converts between them.

use crate::db::{EntryQuery, Store};
use crate::error::Result;
use crate::model::{EntryType, RiskEntry};

pub const DEFAULT_CURRENCY: &str = "USD";

/// Formats an amount with a precision suited to the currency: two decimals
/// for dollar-denominated codes, six for the majors priced in fractions,
/// four for the mid-priced chains, full precision otherwise.
pub fn format_cost(amount: f64, currency: &str) -> String {
    match currency {
        "USD" | "USDC" | "USDT" => format!("${amount:.2} {currency}"),
        "ETH" | "BTC" => format!("{amount:.6} {currency}"),
        "SOL" | "MATIC" | "AVAX" => format!("{amount:.4} {currency}"),
        _ => format!("{amount} {currency}"),
    }
}

/// The currency of the most recent risk entry, for prefilling the next one.
pub fn last_used_currency(store: &Store) -> Result<Option<String>> {
    let entries = store.get_entries(&EntryQuery::of_type(EntryType::Risk).with_limit(20))?;
    Ok(entries
        .iter()
        .find_map(|entry| entry.payload.risk().map(|r| r.currency.clone())))
}

/// Entry cost plus gas, but only when the gas fee carries a currency that
/// matches the entry currency exactly; a fee in a different currency, or
/// with no currency recorded, cannot be summed in.
pub fn total_cost(risk: &RiskEntry) -> f64 {
    let gas = match (&risk.gas_fee, &risk.gas_fee_currency) {
        (Some(fee), Some(fee_currency)) if fee_currency == &risk.currency => *fee,
        _ => 0.0,
    };
    risk.entry_cost + gas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entry, Payload, RiskType};

    #[test]
    fn formats_by_currency_family() {
        assert_eq!(format_cost(150.5, "USD"), "$150.50 USD");
        assert_eq!(format_cost(99.999, "USDC"), "$100.00 USDC");
        assert_eq!(format_cost(0.05, "ETH"), "0.050000 ETH");
        assert_eq!(format_cost(1.25, "SOL"), "1.2500 SOL");
        assert_eq!(format_cost(42.0, "PEPE"), "42 PEPE");
    }

    #[test]
    fn gas_fee_sums_only_on_exact_currency_match() {
        let mut risk = RiskEntry::new(RiskType::Nft, 1.0);
        risk.currency = "ETH".to_string();
        assert_eq!(total_cost(&risk), 1.0);

        risk.gas_fee = Some(0.01);
        risk.gas_fee_currency = Some("ETH".to_string());
        assert!((total_cost(&risk) - 1.01).abs() < 1e-9);

        // Different currency is excluded; so is a case mismatch.
        risk.gas_fee_currency = Some("USD".to_string());
        assert_eq!(total_cost(&risk), 1.0);
        risk.gas_fee_currency = Some("eth".to_string());
        assert_eq!(total_cost(&risk), 1.0);

        // A fee with no recorded currency cannot be matched, so it is
        // excluded too.
        risk.gas_fee_currency = None;
        assert_eq!(total_cost(&risk), 1.0);
    }

    #[test]
    fn last_used_currency_reads_newest_risk() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(last_used_currency(&store).unwrap(), None);

        let mut older = RiskEntry::new(RiskType::Trade, 50.0);
        older.currency = "USDC".to_string();
        let mut entry = Entry::new(EntryType::Risk, "older");
        entry.timestamp = chrono::Utc::now() - chrono::Duration::hours(1);
        entry.payload = Payload::Risk(Box::new(older));
        store.add_entry(&entry).unwrap();

        let mut newer = RiskEntry::new(RiskType::Nft, 0.5);
        newer.currency = "ETH".to_string();
        let mut entry = Entry::new(EntryType::Risk, "newer");
        entry.payload = Payload::Risk(Box::new(newer));
        store.add_entry(&entry).unwrap();

        assert_eq!(last_used_currency(&store).unwrap().as_deref(), Some("ETH"));
    }
}
