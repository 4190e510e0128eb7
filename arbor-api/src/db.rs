use async_trait::async_trait;

use crate::{Comment, CommentId, NewNode, PostId, SubtreeBounds};

/// The write lost a race: either the parent's reply counter moved since it
/// was read, or another comment already took the `(post, path)` key
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Conflict;

/// Storage the comment tree is kept in
///
/// Paths are compared as byte strings, and `(post_id, path)` must be unique.
#[async_trait]
pub trait Db: Send {
    /// Highest path among the depth-1 comments of `post`
    async fn find_last_root_path(&mut self, post: PostId) -> anyhow::Result<Option<String>>;

    async fn find_node(&mut self, id: CommentId, post: PostId) -> anyhow::Result<Option<Comment>>;

    /// Highest path among the direct children of the comment at
    /// `parent_path`, ie. comments at depth `parent_depth + 1` within `bounds`
    async fn find_last_descendant_path_at_depth(
        &mut self,
        post: PostId,
        parent_path: &str,
        parent_depth: i32,
        bounds: &SubtreeBounds,
    ) -> anyhow::Result<Option<String>>;

    /// Comments deeper than `depth` within `bounds`, in ascending path order
    async fn scan_subtree(
        &mut self,
        post: PostId,
        depth: i32,
        bounds: &SubtreeBounds,
    ) -> anyhow::Result<Vec<Comment>>;

    async fn insert_node(&mut self, node: NewNode) -> anyhow::Result<Result<CommentId, Conflict>>;

    /// Set the reply counter of `parent` to `expected + 1` if it still is
    /// `expected`, returning the new value
    async fn conditional_increment_child_count(
        &mut self,
        parent: CommentId,
        parent_path: &str,
        expected: i32,
    ) -> anyhow::Result<Result<i32, Conflict>>;

    /// Increment the reply counter of `parent` and insert `node` as a single
    /// unit, returning the new counter value and the new comment's id
    ///
    /// On `Conflict`, neither write must be visible.
    async fn insert_child(
        &mut self,
        parent: CommentId,
        parent_path: &str,
        expected: i32,
        node: NewNode,
    ) -> anyhow::Result<Result<(i32, CommentId), Conflict>>;

    /// Set the soft-delete flag, returning the updated comment
    async fn mark_deleted(&mut self, id: CommentId, post: PostId)
        -> anyhow::Result<Option<Comment>>;

    /// Number of comments of `post`, deleted ones included
    async fn count_comments(&mut self, post: PostId) -> anyhow::Result<i64>;
}
