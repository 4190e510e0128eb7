use std::fmt;

use crate::{Error, TreeConfig};

/// One fixed-width token of a path, encoding a sibling index
///
/// Segments can only be built through a `Codec`, so a `Segment` always has
/// the codec's width and only contains characters of its alphabet.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Segment(String);

impl Segment {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct Codec {
    config: TreeConfig,
}

impl Codec {
    pub fn new(config: TreeConfig) -> Codec {
        Codec { config }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn width(&self) -> usize {
        self.config.segment_width()
    }

    /// Left-padded base-`alphabet.len()` representation of `n`
    pub fn encode(&self, n: u64) -> Result<Segment, Error> {
        if n >= self.config.capacity() {
            return Err(Error::Overflow(n));
        }
        let alphabet = self.config.alphabet();
        let base = alphabet.len() as u64;
        let mut res = vec![alphabet[0]; self.width()];
        let mut rest = n;
        for c in res.iter_mut().rev() {
            *c = alphabet[(rest % base) as usize];
            rest /= base;
        }
        debug_assert_eq!(rest, 0);
        Ok(Segment(
            String::from_utf8(res).expect("alphabet was checked to be ascii"),
        ))
    }

    pub fn decode(&self, s: &str) -> Result<u64, Error> {
        let bytes = s.as_bytes();
        if bytes.len() != self.width() {
            return Err(Error::MalformedSegment(String::from(s)));
        }
        let alphabet = self.config.alphabet();
        let base = alphabet.len() as u64;
        let mut res = 0u64;
        for c in bytes {
            let digit = alphabet
                .binary_search(c)
                .map_err(|_| Error::MalformedSegment(String::from(s)))?;
            // cannot overflow, as capacity() fits in an u64
            res = res * base + digit as u64;
        }
        Ok(res)
    }

    /// Validate an already-encoded segment
    pub fn parse(&self, s: &str) -> Result<Segment, Error> {
        self.decode(s)?;
        Ok(Segment(String::from(s)))
    }

    /// Lowest possible segment, ie. the first alphabet character repeated
    pub fn min_segment(&self) -> Segment {
        self.encode(0).expect("zero always fits in a segment")
    }

    /// Highest possible segment, ie. the last alphabet character repeated
    pub fn max_segment(&self) -> Segment {
        self.encode(self.config.capacity() - 1)
            .expect("capacity - 1 always fits in a segment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> Codec {
        Codec::new(TreeConfig::default())
    }

    #[test]
    fn known_values() {
        let c = codec();
        assert_eq!(c.encode(0).unwrap().as_str(), "0000");
        assert_eq!(c.encode(1).unwrap().as_str(), "0001");
        assert_eq!(c.encode(35).unwrap().as_str(), "000Z");
        assert_eq!(c.encode(36).unwrap().as_str(), "0010");
        assert_eq!(c.decode("00ZZ").unwrap(), 36 * 36 - 1);
        assert_eq!(c.min_segment().as_str(), "0000");
        assert_eq!(c.max_segment().as_str(), "ZZZZ");
    }

    #[test]
    fn overflow_boundary() {
        let c = codec();
        let cap = 36u64.pow(4);
        assert_eq!(c.encode(cap - 1).unwrap().as_str(), "ZZZZ");
        assert_eq!(c.encode(cap), Err(Error::Overflow(cap)));
        assert_eq!(c.encode(u64::MAX), Err(Error::Overflow(u64::MAX)));
    }

    #[test]
    fn malformed_segments() {
        let c = codec();
        for s in ["", "001", "00001", "000a", "00-1", "ÀÀ"] {
            assert_eq!(
                c.decode(s),
                Err(Error::MalformedSegment(String::from(s))),
                "decoding {s:?}"
            );
        }
    }

    #[test]
    fn whole_range_round_trips_in_order() {
        let c = codec();
        let mut previous = c.encode(0).unwrap();
        assert_eq!(c.decode(previous.as_str()).unwrap(), 0);
        for n in 1..c.config().capacity() {
            let s = c.encode(n).unwrap();
            assert_eq!(c.decode(s.as_str()).unwrap(), n);
            assert!(previous < s, "{previous} >= {s}");
            previous = s;
        }
    }

    #[test]
    fn fuzz_small_alphabets() {
        let c = Codec::new(TreeConfig::new("abc", 3).unwrap());
        bolero::check!()
            .with_type::<(u64, u64)>()
            .cloned()
            .for_each(|(n, m)| {
                let (n, m) = (n % 40, m % 40);
                match (c.encode(n), c.encode(m)) {
                    (Ok(sn), Ok(sm)) => {
                        assert_eq!(c.decode(sn.as_str()).unwrap(), n);
                        assert_eq!(n.cmp(&m), sn.cmp(&sm));
                    }
                    (rn, rm) => {
                        assert_eq!(rn.is_err(), n >= 27);
                        assert_eq!(rm.is_err(), m >= 27);
                    }
                }
            });
    }
}
