//! Order book checksum
//!
//! CRC-32 (IEEE) over the top levels of each side. Every level contributes
//! its price then its quantity, each with the decimal point and leading zeros
//! removed. Asks come first (best first), then bids (best first).

use crc32fast::Hasher;
use depth_core::PriceLevel;

/// Levels per side covered by the checksum
pub const CHECKSUM_DEPTH: usize = 10;

/// Strip the first decimal point and any leading zeros
fn strip(value: &str) -> String {
    value.replacen('.', "", 1).trim_start_matches('0').to_string()
}

/// The string the checksum is computed over
pub fn checksum_payload<'a, A, B>(asks: A, bids: B, depth: usize) -> String
where
    A: IntoIterator<Item = &'a PriceLevel>,
    B: IntoIterator<Item = &'a PriceLevel>,
{
    let mut payload = String::new();
    for level in asks.into_iter().take(depth).chain(bids.into_iter().take(depth)) {
        payload.push_str(&strip(&level.price));
        payload.push_str(&strip(&level.qty));
    }
    payload
}

/// CRC-32 checksum over the top `depth` levels of each side
pub fn checksum<'a, A, B>(asks: A, bids: B, depth: usize) -> u32
where
    A: IntoIterator<Item = &'a PriceLevel>,
    B: IntoIterator<Item = &'a PriceLevel>,
{
    let mut hasher = Hasher::new();
    hasher.update(checksum_payload(asks, bids, depth).as_bytes());
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(pairs: &[(&str, &str)]) -> Vec<PriceLevel> {
        pairs.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect()
    }

    #[test]
    fn test_strip() {
        assert_eq!(strip("100.50"), "10050");
        assert_eq!(strip("0.2"), "2");
        assert_eq!(strip("0.0015"), "15");
        assert_eq!(strip("50000"), "50000");
        // Only the first point is removed
        assert_eq!(strip("1.2.3"), "12.3");
    }

    #[test]
    fn test_golden_vector() {
        let asks = levels(&[("100.50", "2"), ("100.75", "1")]);
        let bids = levels(&[("99.00", "3")]);

        assert_eq!(checksum_payload(&asks, &bids, CHECKSUM_DEPTH), "10050210075199003");
        assert_eq!(checksum(&asks, &bids, CHECKSUM_DEPTH), 3936753440);
    }

    #[test]
    fn test_single_ask() {
        let asks = levels(&[("50000", "1")]);
        let bids: Vec<PriceLevel> = Vec::new();
        assert_eq!(checksum(&asks, &bids, CHECKSUM_DEPTH), 512533699);
    }

    #[test]
    fn test_only_top_levels_count() {
        let asks: Vec<PriceLevel> = (1..=15)
            .map(|i| PriceLevel::new(format!("{}", 100 + i), "1"))
            .collect();
        let bids: Vec<PriceLevel> = (1..=15)
            .map(|i| PriceLevel::new(format!("{}", 100 - i), "1"))
            .collect();

        let full = checksum(&asks, &bids, CHECKSUM_DEPTH);
        let top = checksum(&asks[..10], &bids[..10], CHECKSUM_DEPTH);
        assert_eq!(full, top);
        assert_ne!(full, checksum(&asks[..9], &bids[..10], CHECKSUM_DEPTH));
    }

    #[test]
    fn test_empty_book() {
        // CRC-32 of the empty string
        let empty: Vec<PriceLevel> = Vec::new();
        assert_eq!(checksum(&empty, &empty, CHECKSUM_DEPTH), 0);
    }
}
