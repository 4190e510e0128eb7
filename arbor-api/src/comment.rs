use crate::Time;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub i64);

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub i64);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UserId(pub i64);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: UserId,

    /// Materialized path, the only field encoding the position in the tree
    pub path: String,

    /// Number of segments in `path`, 1 for root comments
    pub depth: i32,

    /// Number of direct replies
    pub num_children: i32,

    pub message: String,
    pub created_at: Time,
    pub updated_at: Time,

    /// Soft-delete flag, the row stays so that replies remain reachable
    pub is_deleted: bool,
}

/// A comment about to be inserted, at an already-allocated path
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewNode {
    pub post_id: PostId,
    pub author_id: UserId,
    pub path: String,
    pub depth: i32,
    pub message: String,
    pub date: Time,
}

impl NewNode {
    pub fn into_comment(self, id: CommentId) -> Comment {
        Comment {
            id,
            post_id: self.post_id,
            author_id: self.author_id,
            path: self.path,
            depth: self.depth,
            num_children: 0,
            message: self.message,
            created_at: self.date,
            updated_at: self.date,
            is_deleted: false,
        }
    }
}

/// Body of a comment creation request
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewMessage {
    pub message: String,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FetchOptions {
    /// Also return the whole subtree below the comment, in path order
    #[serde(default)]
    pub replies: bool,
}
