//! Size budget reservation discipline (spec.md §4.2).
//!
//! The budget is pessimistic: it counts uncompressed bytes plus a
//! per-member header overhead, so the final compressed-and-encrypted output
//! is guaranteed to fit under `cap` even though the reservation itself is
//! not a tight bound.

const OVERHEAD: u64 = 512;
const DEFAULT_CAP: u64 = 500_000_000;

pub struct SizeBudget {
    cap: u64,
    reserved: u64,
}

impl SizeBudget {
    pub fn new(cap: u64) -> Self {
        Self { cap, reserved: 0 }
    }

    /// Parse a `<integer><unit>` string per spec.md §4.2. Malformed input
    /// falls back to the 500 MB default rather than erroring (an explicit
    /// policy call, not an oversight — see SPEC_FULL.md §4.2).
    pub fn parse_cap(s: &str) -> u64 {
        Self::try_parse_cap(s).unwrap_or_else(|| {
            log::warn!("malformed max_target_size {s:?}, falling back to {DEFAULT_CAP}");
            DEFAULT_CAP
        })
    }

    fn try_parse_cap(s: &str) -> Option<u64> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let (digits, unit) = match s.chars().last() {
            Some(c) if c.is_ascii_digit() => (s, None),
            Some(c) => (&s[..s.len() - c.len_utf8()], Some(c)),
            None => return None,
        };
        let n: u64 = digits.parse().ok()?;
        let multiplier: u64 = match unit {
            None => 1,
            Some('k') => 1_000,
            Some('K') => 1 << 10,
            Some('m') => 1_000_000,
            Some('M') => 1 << 20,
            Some('g') => 1_000_000_000,
            Some('G') => 1 << 30,
            Some(_) => return None,
        };
        n.checked_mul(multiplier)
    }

    /// Reserve `size` bytes plus the fixed overhead. Returns `false` (no
    /// state change) if doing so would meet or exceed `cap`.
    pub fn reserve(&mut self, size: u64) -> bool {
        let needed = size.saturating_add(OVERHEAD);
        if self.reserved.saturating_add(needed) >= self.cap {
            return false;
        }
        self.reserved += needed;
        true
    }

    pub fn is_filled(&self) -> bool {
        self.reserved >= self.cap
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    pub fn cap(&self) -> u64 {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(SizeBudget::try_parse_cap("10k"), Some(10_000));
        assert_eq!(SizeBudget::try_parse_cap("10K"), Some(10 * 1024));
        assert_eq!(SizeBudget::try_parse_cap("2m"), Some(2_000_000));
        assert_eq!(SizeBudget::try_parse_cap("2M"), Some(2 * 1024 * 1024));
        assert_eq!(SizeBudget::try_parse_cap("1g"), Some(1_000_000_000));
        assert_eq!(SizeBudget::try_parse_cap("1G"), Some(1 << 30));
        assert_eq!(SizeBudget::try_parse_cap("1000"), Some(1000));
    }

    #[test]
    fn malformed_falls_back_to_default() {
        assert_eq!(SizeBudget::parse_cap("banana"), DEFAULT_CAP);
        assert_eq!(SizeBudget::parse_cap(""), DEFAULT_CAP);
        assert_eq!(SizeBudget::parse_cap("5x"), DEFAULT_CAP);
    }

    #[test]
    fn reserve_respects_cap_and_overhead() {
        let mut b = SizeBudget::new(1000);
        assert!(b.reserve(100)); // 100 + 512 = 612 < 1000
        assert!(!b.reserve(400)); // 612 + 400 + 512 = 1524 >= 1000, rejected, no state change
        assert_eq!(b.reserved(), 612);
        assert!(!b.is_filled());
    }

    #[test]
    fn cap_reached_after_overhead_alone() {
        // cap=25: first reserve of 10 bytes consumes 10+512=522 >= 25, filling it.
        let mut b = SizeBudget::new(25);
        assert!(!b.reserve(10));
        assert!(b.reserved() == 0);
        assert!(!b.is_filled());
    }

    #[test]
    fn property_p1_never_exceeds_cap() {
        let mut b = SizeBudget::new(2_000);
        let sizes = [100u64, 200, 50, 900, 10, 5];
        for s in sizes {
            b.reserve(s);
        }
        assert!(b.reserved() <= b.cap());
    }
}
