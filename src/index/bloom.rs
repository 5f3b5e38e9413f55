use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use crate::core::types::Value;

/// Membership filter for one column, built at seal time from the
/// column's dictionary. Ingestion never consults it; the read path uses
/// it to skip segments that cannot contain a value.
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    pub fn with_expected_insertions(expected: usize, fpp: f64) -> Self {
        let expected = expected.max(1) as f64;
        let fpp = fpp.clamp(1e-9, 0.5);

        let num_bits = (-(expected * fpp.ln()) / (2f64.ln() * 2f64.ln()))
            .ceil()
            .max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / expected) * 2f64.ln()).round().max(1.0) as u32;

        BloomFilter {
            bits: vec![0u64; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
        }
    }

    fn hash_pair(data: &[u8]) -> (u64, u64) {
        let mut h1 = DefaultHasher::new();
        h1.write(data);
        let a = h1.finish();

        let mut h2 = DefaultHasher::new();
        h2.write_u64(a);
        h2.write(data);
        let b = h2.finish() | 1;
        (a, b)
    }

    pub fn add_bytes(&mut self, data: &[u8]) {
        let (a, b) = Self::hash_pair(data);
        for i in 0..self.num_hashes as u64 {
            let bit = a.wrapping_add(i.wrapping_mul(b)) % self.num_bits;
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    pub fn might_contain_bytes(&self, data: &[u8]) -> bool {
        let (a, b) = Self::hash_pair(data);
        for i in 0..self.num_hashes as u64 {
            let bit = a.wrapping_add(i.wrapping_mul(b)) % self.num_bits;
            if self.bits[(bit / 64) as usize] & (1 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }

    pub fn add(&mut self, value: &Value) {
        self.add_bytes(&value.canonical_bytes());
    }

    pub fn might_contain(&self, value: &Value) -> bool {
        self.might_contain_bytes(&value.canonical_bytes())
    }

    pub fn size_bytes(&self) -> usize {
        self.bits.len() * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::with_expected_insertions(1000, 0.01);
        for i in 0..1000i64 {
            filter.add(&Value::Long(i * 13));
        }
        for i in 0..1000i64 {
            assert!(filter.might_contain(&Value::Long(i * 13)));
        }
    }

    #[test]
    fn test_false_positive_rate_is_sane() {
        let mut filter = BloomFilter::with_expected_insertions(1000, 0.01);
        for i in 0..1000i64 {
            filter.add(&Value::Long(i));
        }

        let false_positives = (1000..11_000i64)
            .filter(|v| filter.might_contain(&Value::Long(*v)))
            .count();
        // 1% target; allow generous slack
        assert!(false_positives < 500, "fpp too high: {}", false_positives);
    }

    #[test]
    fn test_string_membership() {
        let mut filter = BloomFilter::with_expected_insertions(10, 0.01);
        filter.add(&Value::String("a".to_string()));
        assert!(filter.might_contain(&Value::String("a".to_string())));
    }
}
