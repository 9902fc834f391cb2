//! Fractional positions for list children.
//!
//! A position is a base-62 string read as a fraction `0.d1d2d3…`. Comparing
//! positions is plain string comparison, and a new position can always be
//! synthesized strictly between two others, so inserting never renumbers
//! siblings. Generated positions never end with the lowest digit (`'0'`),
//! which keeps room below every one of them.

/// Base-62 digits in ascending byte order: `'0' < '9' < 'A' < 'Z' < 'a' < 'z'`.
pub const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

const BASE: usize = DIGITS.len();
const ZERO: char = '0';

/// Value of a digit. Bytes outside [`DIGITS`] clamp to the nearest digit
/// below them, so callers must only pass positions that pass [`is_valid`].
fn digit(c: u8) -> usize {
    match c {
        b'0'..=b'9' => (c - b'0') as usize,
        b'A'..=b'Z' => (c - b'A') as usize + 10,
        b'a'..=b'z' => (c - b'a') as usize + 36,
        _ if c < b'0' => 0,
        _ if c < b'A' => 9,
        _ if c < b'a' => 35,
        _ => BASE - 1,
    }
}

/// Whether `position` is a non-empty string of base-62 digits.
pub fn is_valid(position: &str) -> bool {
    !position.is_empty() && position.bytes().all(|c| c.is_ascii_alphanumeric())
}

/// Position for the first child of an empty list.
pub fn first() -> String {
    between(None, None)
}

/// A position strictly after `position`.
pub fn after(position: &str) -> String {
    between(Some(position), None)
}

/// A position strictly before `position`.
pub fn before(position: &str) -> String {
    between(None, Some(position))
}

/// A position strictly between `lo` and `hi`.
///
/// `None` stands for the open start / end of the list. If `hi` does not sort
/// after `lo` (two children share a position after a concurrent insert) the
/// result is only guaranteed to sort after `lo`.
pub fn between(lo: Option<&str>, hi: Option<&str>) -> String {
    let lo = lo.unwrap_or("").as_bytes();
    let mut upper = hi
        .map(|h| h.trim_end_matches(ZERO))
        .filter(|h| !h.is_empty() && lo < h.as_bytes())
        .map(str::as_bytes);

    let mut out = String::new();
    let mut i = 0;
    loop {
        if upper.is_some_and(|u| i >= u.len()) {
            upper = None;
        }
        let l = lo.get(i).map_or(0, |&c| digit(c));
        let h = upper.map_or(BASE, |u| digit(u[i]));

        if h > l + 1 {
            out.push(DIGITS[(l + h) / 2] as char);
            return out;
        }
        out.push(DIGITS[l] as char);
        if h != l {
            // Already below `hi` on this digit; only `lo` bounds the rest.
            upper = None;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_position() {
        assert_eq!(first(), "V");
    }

    #[test]
    fn test_after_and_before() {
        let p = first();
        let a = after(&p);
        let b = before(&p);
        assert!(b < p);
        assert!(p < a);
    }

    #[test]
    fn test_between_adjacent_digits() {
        let p = between(Some("a"), Some("b"));
        assert!("a" < p.as_str() && p.as_str() < "b");
        assert!(p.starts_with('a'));
    }

    #[test]
    fn test_between_prefix() {
        // "a" is a prefix of "aV"; the result must fit between them.
        let p = between(Some("a"), Some("aV"));
        assert!("a" < p.as_str() && p.as_str() < "aV");
    }

    #[test]
    fn test_after_max_digit() {
        let p = after("z");
        assert!(p.as_str() > "z");
        let q = after("zz");
        assert!(q.as_str() > "zz");
    }

    #[test]
    fn test_before_min_digit() {
        let p = before("1");
        assert!(p.as_str() < "1");
        assert!(!p.ends_with(ZERO));
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid("V"));
        assert!(is_valid("0aZ9"));
        assert!(!is_valid(""));
        assert!(!is_valid("~"));
        assert!(!is_valid("a-b"));
        assert!(is_valid(&after("zz")));
    }

    #[test]
    fn test_equal_bounds_fall_back_to_after() {
        let p = between(Some("V"), Some("V"));
        assert!(p.as_str() > "V");
    }

    #[test]
    fn test_repeated_insert_at_front_stays_ordered() {
        let mut head = first();
        for _ in 0..200 {
            let next = before(&head);
            assert!(next < head);
            assert!(!next.ends_with(ZERO));
            head = next;
        }
    }

    #[test]
    fn test_repeated_insert_between_converges_in_length() {
        let lo = first();
        let mut hi = after(&lo);
        for _ in 0..100 {
            let mid = between(Some(&lo), Some(&hi));
            assert!(lo < mid && mid < hi);
            hi = mid;
        }
    }

    fn position() -> impl Strategy<Value = String> {
        proptest::collection::vec(0usize..BASE, 1..6).prop_map(|digits| {
            let mut s: String = digits.into_iter().map(|d| DIGITS[d] as char).collect();
            if s.ends_with(ZERO) {
                s.pop();
                s.push('1');
            }
            s
        })
    }

    proptest! {
        #[test]
        fn prop_between_is_strict(a in position(), b in position()) {
            prop_assume!(a != b);
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            let mid = between(Some(&lo), Some(&hi));
            prop_assert!(lo < mid, "{lo} < {mid}");
            prop_assert!(mid < hi, "{mid} < {hi}");
            prop_assert!(!mid.ends_with(ZERO));
        }
    }
}
