use std::fmt;

use crate::{Codec, Error, Segment, TreeConfig};

/// Position of a comment in its post's forest, one segment per level
///
/// Paths are ordered like their string rendering: as all segments have the
/// same width, comparing paths gives the pre-order of the forest.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Path(Vec<Segment>);

impl Path {
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// True for the empty prefix above root comments
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    fn with(&self, s: Segment) -> Path {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend_from_slice(&self.0);
        segments.push(s);
        Path(segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.0 {
            f.write_str(s.as_str())?;
        }
        Ok(())
    }
}

/// Inclusive range of paths containing the descendants of a node
///
/// The child at the highest sibling index is `upper` itself, so its own
/// descendants sort after `upper`: they are the paths having `upper` as a
/// prefix, and stores must include them too.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubtreeBounds {
    pub lower: Path,
    pub upper: Path,
}

impl SubtreeBounds {
    pub fn contains(&self, path: &str) -> bool {
        let lower = self.lower.to_string();
        let upper = self.upper.to_string();
        lower.as_str() <= path && (path <= upper.as_str() || path.starts_with(&upper))
    }
}

#[derive(Clone, Debug)]
pub struct PathAlgebra {
    codec: Codec,
}

impl PathAlgebra {
    pub fn new(config: TreeConfig) -> PathAlgebra {
        PathAlgebra {
            codec: Codec::new(config),
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Split a stored path into its segments
    pub fn parse(&self, s: &str) -> Result<Path, Error> {
        let width = self.codec.width();
        if s.is_empty() || s.len() % width != 0 || !s.is_ascii() {
            return Err(Error::MalformedSegment(String::from(s)));
        }
        Ok(Path(
            s.as_bytes()
                .chunks(width)
                .map(|c| {
                    // s is ascii so every chunk is valid utf-8
                    self.codec.parse(std::str::from_utf8(c).unwrap_or_default())
                })
                .collect::<Result<Vec<_>, _>>()?,
        ))
    }

    pub fn root_path(&self, n: u64) -> Result<Path, Error> {
        Ok(Path(vec![self.codec.encode(n)?]))
    }

    pub fn first_child_path(&self, parent: &Path) -> Result<Path, Error> {
        Ok(parent.with(self.codec.encode(1)?))
    }

    pub fn next_sibling_path(&self, path: &Path) -> Result<Path, Error> {
        let last = path
            .last()
            .ok_or_else(|| Error::MalformedSegment(String::new()))?;
        let idx = self.codec.decode(last.as_str())?;
        let next = self
            .codec
            .encode(idx.checked_add(1).ok_or(Error::Overflow(idx))?)?;
        Ok(self.parent_prefix(path).with(next))
    }

    pub fn parent_prefix(&self, path: &Path) -> Path {
        let mut segments = path.0.clone();
        segments.pop();
        Path(segments)
    }

    pub fn subtree_bounds(&self, path: &Path) -> SubtreeBounds {
        SubtreeBounds {
            lower: path.with(self.codec.min_segment()),
            upper: path.with(self.codec.max_segment()),
        }
    }
}
