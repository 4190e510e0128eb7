use anyhow::Context;
use chrono::Utc;

use crate::{
    Comment, CommentId, Conflict, Db, Error, NewNode, Path, PathAlgebra, PostId, TreeConfig,
    TreeError, UserId,
};

/// A reply whose path was allocated against a snapshot of its parent, and
/// that still has to be written
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingReply {
    pub parent_id: CommentId,
    pub parent_path: String,
    /// Reply counter of the parent in the snapshot
    pub expected_children: i32,
    pub node: NewNode,
}

/// Comment forest operations, over any `Db`
#[derive(Clone, Debug)]
pub struct CommentTree {
    paths: PathAlgebra,
    max_attempts: usize,
}

fn validate_message(message: &str) -> Result<String, Error> {
    let message = message.trim();
    if message.is_empty() {
        return Err(Error::validation("message is empty"));
    }
    if message.contains('\0') {
        return Err(Error::validation("message contains a null byte"));
    }
    Ok(String::from(message))
}

fn require_id(id: i64, what: &str) -> Result<(), Error> {
    if id == 0 {
        return Err(Error::validation(format!("missing {what} id")));
    }
    Ok(())
}

fn depth_of(path: &Path) -> Result<i32, Error> {
    i32::try_from(path.depth())
        .map_err(|_| Error::InconsistentState(format!("path {path} is too deep")))
}

impl CommentTree {
    pub fn new(config: TreeConfig) -> CommentTree {
        CommentTree {
            max_attempts: config.max_attempts(),
            paths: PathAlgebra::new(config),
        }
    }

    pub fn paths(&self) -> &PathAlgebra {
        &self.paths
    }

    pub async fn create_root_comment<D: Db>(
        &self,
        db: &mut D,
        post: PostId,
        author: UserId,
        message: &str,
    ) -> Result<Comment, TreeError> {
        require_id(post.0, "post")?;
        require_id(author.0, "author")?;
        let message = validate_message(message)?;
        for attempt in 1..=self.max_attempts {
            let last = db
                .find_last_root_path(post)
                .await
                .with_context(|| format!("finding last root comment of {post:?}"))?;
            let path = match last {
                None => self.paths.root_path(1)?,
                Some(last) => self.paths.next_sibling_path(&self.paths.parse(&last)?)?,
            };
            let node = NewNode {
                post_id: post,
                author_id: author,
                path: path.to_string(),
                depth: 1,
                message: message.clone(),
                date: Utc::now(),
            };
            match db
                .insert_node(node.clone())
                .await
                .with_context(|| format!("inserting root comment {path} of {post:?}"))?
            {
                Ok(id) => {
                    tracing::debug!(?post, ?id, %path, "created root comment");
                    return Ok(node.into_comment(id));
                }
                Err(Conflict) => {
                    tracing::warn!(?post, %path, attempt, "root comment path already taken");
                }
            }
        }
        Err(Error::ConcurrentModification.into())
    }

    /// Allocate the path of a new reply to `parent`, without writing anything
    pub async fn prepare_reply<D: Db>(
        &self,
        db: &mut D,
        parent: CommentId,
        post: PostId,
        author: UserId,
        message: &str,
    ) -> Result<PendingReply, TreeError> {
        require_id(parent.0, "comment")?;
        require_id(post.0, "post")?;
        require_id(author.0, "author")?;
        let message = validate_message(message)?;
        let node = db
            .find_node(parent, post)
            .await
            .with_context(|| format!("fetching parent comment {parent:?}"))?
            .ok_or(Error::NotFound(parent))?;
        let parent_path = self.paths.parse(&node.path)?;
        let path = if node.num_children == 0 {
            self.paths.first_child_path(&parent_path)?
        } else {
            let bounds = self.paths.subtree_bounds(&parent_path);
            let last_child = db
                .find_last_descendant_path_at_depth(post, &node.path, node.depth, &bounds)
                .await
                .with_context(|| format!("finding last reply to {parent:?}"))?
                .ok_or_else(|| {
                    Error::InconsistentState(format!(
                        "comment {parent:?} has {} replies but none could be found",
                        node.num_children
                    ))
                })?;
            self.paths.next_sibling_path(&self.paths.parse(&last_child)?)?
        };
        Ok(PendingReply {
            parent_id: node.id,
            parent_path: node.path,
            expected_children: node.num_children,
            node: NewNode {
                post_id: post,
                author_id: author,
                path: path.to_string(),
                depth: depth_of(&path)?,
                message,
                date: Utc::now(),
            },
        })
    }

    /// Write a prepared reply, failing if the parent changed since it was read
    pub async fn commit_reply<D: Db>(
        &self,
        db: &mut D,
        reply: PendingReply,
    ) -> Result<Comment, TreeError> {
        let PendingReply {
            parent_id,
            parent_path,
            expected_children,
            node,
        } = reply;
        match db
            .insert_child(parent_id, &parent_path, expected_children, node.clone())
            .await
            .with_context(|| format!("inserting reply {} to {parent_id:?}", node.path))?
        {
            Ok((num_children, id)) => {
                tracing::debug!(?parent_id, ?id, path = %node.path, num_children, "created reply");
                Ok(node.into_comment(id))
            }
            Err(Conflict) => Err(Error::ConcurrentModification.into()),
        }
    }

    pub async fn create_reply<D: Db>(
        &self,
        db: &mut D,
        parent: CommentId,
        post: PostId,
        author: UserId,
        message: &str,
    ) -> Result<Comment, TreeError> {
        let mut attempt = 1;
        loop {
            let reply = self.prepare_reply(db, parent, post, author, message).await?;
            match self.commit_reply(db, reply).await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(?parent, attempt, "reply lost a race, retrying");
                    attempt += 1;
                }
                res => return res,
            }
        }
    }

    /// The comment, followed by all its replies in pre-order if `include_replies`
    pub async fn fetch_comment_with_replies<D: Db>(
        &self,
        db: &mut D,
        id: CommentId,
        post: PostId,
        include_replies: bool,
    ) -> Result<Vec<Comment>, TreeError> {
        require_id(id.0, "comment")?;
        require_id(post.0, "post")?;
        let node = db
            .find_node(id, post)
            .await
            .with_context(|| format!("fetching comment {id:?}"))?
            .ok_or(Error::NotFound(id))?;
        if !include_replies || node.num_children == 0 {
            return Ok(vec![node]);
        }
        let bounds = self.paths.subtree_bounds(&self.paths.parse(&node.path)?);
        let replies = db
            .scan_subtree(post, node.depth, &bounds)
            .await
            .with_context(|| format!("fetching replies to comment {id:?}"))?;
        let mut res = Vec::with_capacity(replies.len() + 1);
        res.push(node);
        res.extend(replies);
        Ok(res)
    }

    /// Soft-delete a single comment, leaving its replies untouched
    pub async fn delete_comment<D: Db>(
        &self,
        db: &mut D,
        id: CommentId,
        post: PostId,
    ) -> Result<Comment, TreeError> {
        require_id(id.0, "comment")?;
        require_id(post.0, "post")?;
        let res = db
            .mark_deleted(id, post)
            .await
            .with_context(|| format!("marking comment {id:?} deleted"))?
            .ok_or(Error::NotFound(id))?;
        tracing::debug!(?id, path = %res.path, "soft-deleted comment");
        Ok(res)
    }

    pub async fn count_comments<D: Db>(&self, db: &mut D, post: PostId) -> Result<i64, TreeError> {
        require_id(post.0, "post")?;
        Ok(db
            .count_comments(post)
            .await
            .with_context(|| format!("counting comments of {post:?}"))?)
    }
}
