use crate::digester::Digester;

/// CRC-32 (IEEE) using `crc32fast`.
#[derive(Clone, Debug, Default)]
pub struct Crc32Digester {
    initial: u32,
    hasher: crc32fast::Hasher,
}

impl Crc32Digester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues a checksum computed earlier over preceding data.
    pub fn with_initial(initial: u32) -> Self {
        Self {
            initial,
            hasher: crc32fast::Hasher::new_with_initial(initial),
        }
    }
}

impl Digester for Crc32Digester {
    type Digest = u32;

    fn write(&mut self, src: &[u8]) {
        self.hasher.update(src);
    }

    fn digest(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn reset(&mut self) {
        self.hasher = crc32fast::Hasher::new_with_initial(self.initial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_one_shot_checksum() {
        let mut digester = Crc32Digester::new();
        digester.write(b"hello ");
        assert_eq!(digester.digest(), crc32fast::hash(b"hello "));
        digester.write(b"world");
        assert_eq!(digester.digest(), crc32fast::hash(b"hello world"));
    }

    #[test]
    fn continues_from_initial_value() {
        let mut digester = Crc32Digester::with_initial(crc32fast::hash(b"abc"));
        digester.write(b"def");
        assert_eq!(digester.digest(), crc32fast::hash(b"abcdef"));
        digester.reset();
        assert_eq!(digester.digest(), crc32fast::hash(b"abc"));
    }

    #[test]
    fn zeros_are_digested() {
        let mut digester = Crc32Digester::new();
        digester.write_zeros(10_000);
        assert_eq!(digester.digest(), crc32fast::hash(&[0u8; 10_000]));
    }
}
