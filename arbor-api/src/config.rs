use std::sync::Arc;

pub const DEFAULT_ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const DEFAULT_SEGMENT_WIDTH: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Shape of the path key space of one comment tree
///
/// The alphabet must be strictly increasing in byte order, so that comparing
/// two encoded segments as strings compares the sibling indices they encode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreeConfig {
    alphabet: Arc<[u8]>,
    segment_width: usize,
    capacity: u64,

    max_attempts: usize,
}

impl TreeConfig {
    pub fn new(alphabet: &str, segment_width: usize) -> anyhow::Result<TreeConfig> {
        anyhow::ensure!(
            alphabet.is_ascii(),
            "path alphabet {alphabet:?} must only contain ascii characters"
        );
        let alphabet = alphabet.as_bytes();
        anyhow::ensure!(
            alphabet.len() >= 2,
            "path alphabet must have at least two characters"
        );
        anyhow::ensure!(
            alphabet.windows(2).all(|w| w[0] < w[1]),
            "path alphabet {:?} must be sorted and without duplicates",
            String::from_utf8_lossy(alphabet),
        );
        anyhow::ensure!(segment_width >= 1, "segment width must be at least 1");
        let capacity = u32::try_from(segment_width)
            .ok()
            .and_then(|w| (alphabet.len() as u64).checked_pow(w))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "{} ^ {segment_width} sibling indices do not fit in 64 bits",
                    alphabet.len()
                )
            })?;
        Ok(TreeConfig {
            alphabet: Arc::from(alphabet),
            segment_width,
            capacity,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> TreeConfig {
        self.max_attempts = std::cmp::max(1, max_attempts);
        self
    }

    /// How many times a write is attempted before a conflict is surfaced,
    /// always at least once
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn alphabet(&self) -> &[u8] {
        &self.alphabet
    }

    pub fn segment_width(&self) -> usize {
        self.segment_width
    }

    /// Number of values one segment can hold, ie. `alphabet.len() ^ segment_width`
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl Default for TreeConfig {
    fn default() -> TreeConfig {
        TreeConfig::new(DEFAULT_ALPHABET, DEFAULT_SEGMENT_WIDTH)
            .expect("default tree configuration is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capacity() {
        let cfg = TreeConfig::default();
        assert_eq!(cfg.capacity(), 36u64.pow(4));
        assert_eq!(cfg.segment_width(), 4);
        assert_eq!(cfg.max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn rejects_bad_alphabets() {
        assert!(TreeConfig::new("0", 4).is_err());
        assert!(TreeConfig::new("10", 4).is_err());
        assert!(TreeConfig::new("0012", 4).is_err());
        assert!(TreeConfig::new("0123é", 4).is_err());
        assert!(TreeConfig::new("01", 0).is_err());
        assert!(TreeConfig::new(DEFAULT_ALPHABET, 13).is_err());
        assert!(TreeConfig::new(DEFAULT_ALPHABET, 12).is_ok());
    }

    #[test]
    fn attempts_are_at_least_one() {
        assert_eq!(TreeConfig::default().with_max_attempts(0).max_attempts(), 1);
        assert_eq!(TreeConfig::default().with_max_attempts(5).max_attempts(), 5);
    }
}
