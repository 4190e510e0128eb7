use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use arbor_api::{
    Comment, CommentId, CommentTree, Conflict, Db, Error, NewNode, PostId, SubtreeBounds,
    TreeConfig, TreeError, UserId,
};
use async_trait::async_trait;
use tokio::sync::Mutex;

mod tests;

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    comments: HashMap<CommentId, Comment>,
    by_path: BTreeMap<(PostId, String), CommentId>,
}

impl Tables {
    fn get_mut(&mut self, id: CommentId, post: PostId) -> Option<&mut Comment> {
        self.comments.get_mut(&id).filter(|c| c.post_id == post)
    }

    fn insert(&mut self, node: NewNode) -> Result<CommentId, Conflict> {
        let key = (node.post_id, node.path.clone());
        if self.by_path.contains_key(&key) {
            return Err(Conflict);
        }
        self.next_id += 1;
        let id = CommentId(self.next_id);
        self.by_path.insert(key, id);
        self.comments.insert(id, node.into_comment(id));
        Ok(id)
    }

    fn increment(&mut self, parent: CommentId, path: &str, expected: i32) -> Result<i32, Conflict> {
        match self.comments.get_mut(&parent) {
            Some(c) if c.path == path && c.num_children == expected => {
                c.num_children += 1;
                Ok(c.num_children)
            }
            _ => Err(Conflict),
        }
    }

    /// Comments of `post` within `bounds`, in path order
    fn range(&self, post: PostId, bounds: &SubtreeBounds) -> Vec<&Comment> {
        self.by_path
            .range((post, bounds.lower.to_string())..)
            .take_while(|((p, path), _)| *p == post && bounds.contains(path))
            .map(|(_, id)| &self.comments[id])
            .collect()
    }
}

/// In-memory comment store, cheap to clone and shared between clones
#[derive(Clone, Debug, Default)]
pub struct MemDb(Arc<Mutex<Tables>>);

impl MemDb {
    pub fn new() -> MemDb {
        MemDb::default()
    }

    /// Overwrite the reply counter of a comment, bypassing all checks
    pub async fn test_set_num_children(&self, id: CommentId, num_children: i32) {
        if let Some(c) = self.0.lock().await.comments.get_mut(&id) {
            c.num_children = num_children;
        }
    }

    /// Overwrite the path of a comment, bypassing all checks
    pub async fn test_set_path(&self, id: CommentId, path: &str) {
        let mut t = self.0.lock().await;
        if let Some(c) = t.comments.get_mut(&id) {
            let old = (c.post_id, std::mem::replace(&mut c.path, String::from(path)));
            let new = (c.post_id, String::from(path));
            t.by_path.remove(&old);
            t.by_path.insert(new, id);
        }
    }

    pub async fn test_num_comments(&self) -> usize {
        self.0.lock().await.comments.len()
    }
}

#[async_trait]
impl Db for MemDb {
    async fn find_last_root_path(&mut self, post: PostId) -> anyhow::Result<Option<String>> {
        Ok(self
            .0
            .lock()
            .await
            .comments
            .values()
            .filter(|c| c.post_id == post && c.depth == 1)
            .map(|c| c.path.clone())
            .max())
    }

    async fn find_node(&mut self, id: CommentId, post: PostId) -> anyhow::Result<Option<Comment>> {
        Ok(self
            .0
            .lock()
            .await
            .comments
            .get(&id)
            .filter(|c| c.post_id == post)
            .cloned())
    }

    async fn find_last_descendant_path_at_depth(
        &mut self,
        post: PostId,
        _parent_path: &str,
        parent_depth: i32,
        bounds: &SubtreeBounds,
    ) -> anyhow::Result<Option<String>> {
        Ok(self
            .0
            .lock()
            .await
            .range(post, bounds)
            .into_iter()
            .rev()
            .find(|c| c.depth == parent_depth + 1)
            .map(|c| c.path.clone()))
    }

    async fn scan_subtree(
        &mut self,
        post: PostId,
        depth: i32,
        bounds: &SubtreeBounds,
    ) -> anyhow::Result<Vec<Comment>> {
        Ok(self
            .0
            .lock()
            .await
            .range(post, bounds)
            .into_iter()
            .filter(|c| c.depth > depth)
            .cloned()
            .collect())
    }

    async fn insert_node(&mut self, node: NewNode) -> anyhow::Result<Result<CommentId, Conflict>> {
        Ok(self.0.lock().await.insert(node))
    }

    async fn conditional_increment_child_count(
        &mut self,
        parent: CommentId,
        parent_path: &str,
        expected: i32,
    ) -> anyhow::Result<Result<i32, Conflict>> {
        Ok(self.0.lock().await.increment(parent, parent_path, expected))
    }

    async fn insert_child(
        &mut self,
        parent: CommentId,
        parent_path: &str,
        expected: i32,
        node: NewNode,
    ) -> anyhow::Result<Result<(i32, CommentId), Conflict>> {
        let mut t = self.0.lock().await;
        if t.by_path.contains_key(&(node.post_id, node.path.clone())) {
            return Ok(Err(Conflict));
        }
        let count = match t.increment(parent, parent_path, expected) {
            Ok(count) => count,
            Err(Conflict) => return Ok(Err(Conflict)),
        };
        Ok(t.insert(node).map(|id| (count, id)))
    }

    async fn mark_deleted(
        &mut self,
        id: CommentId,
        post: PostId,
    ) -> anyhow::Result<Option<Comment>> {
        let mut t = self.0.lock().await;
        Ok(t.get_mut(id, post).map(|c| {
            c.is_deleted = true;
            c.clone()
        }))
    }

    async fn count_comments(&mut self, post: PostId) -> anyhow::Result<i64> {
        Ok(self
            .0
            .lock()
            .await
            .comments
            .values()
            .filter(|c| c.post_id == post)
            .count() as i64)
    }
}

fn to_api(e: TreeError) -> Error {
    match e {
        TreeError::Api(e) => e,
        TreeError::Store(err) => {
            tracing::error!(?err, "mock store failure");
            Error::Unknown(format!("Internal server error: {err:?}"))
        }
    }
}

/// Reference implementation of the HTTP API, without any network nor database
pub struct MockServer {
    db: MemDb,
    tree: CommentTree,
}

impl MockServer {
    pub fn new(config: TreeConfig) -> MockServer {
        MockServer {
            db: MemDb::new(),
            tree: CommentTree::new(config),
        }
    }

    pub fn db(&self) -> &MemDb {
        &self.db
    }

    /// Return the current number of comments, across all posts
    pub async fn test_num_comments(&self) -> usize {
        self.db.test_num_comments().await
    }

    pub async fn create_root_comment(
        &mut self,
        post: PostId,
        author: UserId,
        message: &str,
    ) -> Result<Comment, Error> {
        self.tree
            .create_root_comment(&mut self.db, post, author, message)
            .await
            .map_err(to_api)
    }

    pub async fn create_reply(
        &mut self,
        post: PostId,
        parent: CommentId,
        author: UserId,
        message: &str,
    ) -> Result<Comment, Error> {
        self.tree
            .create_reply(&mut self.db, parent, post, author, message)
            .await
            .map_err(to_api)
    }

    pub async fn fetch_comment(
        &mut self,
        post: PostId,
        id: CommentId,
        replies: bool,
    ) -> Result<Vec<Comment>, Error> {
        self.tree
            .fetch_comment_with_replies(&mut self.db, id, post, replies)
            .await
            .map_err(to_api)
    }

    pub async fn delete_comment(&mut self, post: PostId, id: CommentId) -> Result<Comment, Error> {
        self.tree
            .delete_comment(&mut self.db, id, post)
            .await
            .map_err(to_api)
    }

    pub async fn count_comments(&mut self, post: PostId) -> Result<i64, Error> {
        self.tree
            .count_comments(&mut self.db, post)
            .await
            .map_err(to_api)
    }
}
