use std::cmp::Ordering;

/// Total order over fixed-width keys.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Orders little-endian unsigned integers. Four and eight byte keys are
/// decoded; any other width falls back to comparing from the most
/// significant byte down.
pub struct IntegerComparator;

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        if let (Ok(a), Ok(b)) = (<[u8; 4]>::try_from(a), <[u8; 4]>::try_from(b)) {
            return u32::from_le_bytes(a).cmp(&u32::from_le_bytes(b));
        }
        if let (Ok(a), Ok(b)) = (<[u8; 8]>::try_from(a), <[u8; 8]>::try_from(b)) {
            return u64::from_le_bytes(a).cmp(&u64::from_le_bytes(b));
        }
        a.len()
            .cmp(&b.len())
            .then_with(|| a.iter().rev().cmp(b.iter().rev()))
    }
}

/// Lexicographic byte order.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_order() {
        let cmp = IntegerComparator;
        assert_eq!(cmp.compare(&256u32.to_le_bytes(), &255u32.to_le_bytes()), Ordering::Greater);
        assert_eq!(cmp.compare(&7u32.to_le_bytes(), &7u32.to_le_bytes()), Ordering::Equal);
        assert_eq!(cmp.compare(&1u64.to_le_bytes(), &(1u64 << 40).to_le_bytes()), Ordering::Less);
        assert_eq!(cmp.compare(&[1, 0, 2], &[2, 0, 1]), Ordering::Greater);
    }

    #[test]
    fn test_bytewise_order() {
        let cmp = BytewiseComparator;
        assert_eq!(cmp.compare(b"abc", b"abd"), Ordering::Less);
        // Bytewise order disagrees with integer order on little-endian input.
        assert_eq!(cmp.compare(&256u32.to_le_bytes(), &255u32.to_le_bytes()), Ordering::Less);
    }
}
