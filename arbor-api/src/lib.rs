use chrono::Utc;

pub type Time = chrono::DateTime<Utc>;

mod comment;
pub use comment::{Comment, CommentId, FetchOptions, NewMessage, NewNode, PostId, UserId};

mod config;
pub use config::{TreeConfig, DEFAULT_ALPHABET, DEFAULT_MAX_ATTEMPTS, DEFAULT_SEGMENT_WIDTH};

mod db;
pub use db::{Conflict, Db};

mod error;
pub use error::{Error, TreeError};

mod path;
pub use path::{Path, PathAlgebra, SubtreeBounds};

mod segment;
pub use segment::{Codec, Segment};

mod tree;
pub use tree::{CommentTree, PendingReply};

/// Header the upstream authentication layer sets to the author's id
pub const AUTHOR_HEADER: &str = "x-user-id";
