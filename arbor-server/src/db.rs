use anyhow::Context;
use arbor_api::{
    Comment, CommentId, Conflict, Db, NewNode, PostId, SubtreeBounds, Time, UserId,
};
use async_trait::async_trait;
use sqlx::Connection;

const COLUMNS: &str = "
    id, post_id, author_id, path, depth, num_children, message, created_at, updated_at, is_deleted
";

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: i64,
    post_id: i64,
    author_id: i64,
    path: String,
    depth: i32,
    num_children: i32,
    message: String,
    created_at: Time,
    updated_at: Time,
    is_deleted: bool,
}

impl From<CommentRow> for Comment {
    fn from(r: CommentRow) -> Comment {
        Comment {
            id: CommentId(r.id),
            post_id: PostId(r.post_id),
            author_id: UserId(r.author_id),
            path: r.path,
            depth: r.depth,
            num_children: r.num_children,
            message: r.message,
            created_at: r.created_at,
            updated_at: r.updated_at,
            is_deleted: r.is_deleted,
        }
    }
}

pub struct PostgresDb<'a> {
    pub conn: &'a mut sqlx::PgConnection,
}

async fn insert_node_in(
    conn: &mut sqlx::PgConnection,
    node: &NewNode,
) -> anyhow::Result<Option<i64>> {
    // Nothing is returned when (post_id, path) is already taken
    sqlx::query_scalar::<_, i64>(
        "
            INSERT INTO comments
                (post_id, author_id, path, depth, message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (post_id, path) DO NOTHING
            RETURNING id
        ",
    )
    .bind(node.post_id.0)
    .bind(node.author_id.0)
    .bind(&node.path)
    .bind(node.depth)
    .bind(&node.message)
    .bind(node.date)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("inserting comment at path {:?}", node.path))
}

async fn increment_in(
    conn: &mut sqlx::PgConnection,
    parent: CommentId,
    parent_path: &str,
    expected: i32,
) -> anyhow::Result<Option<i32>> {
    sqlx::query_scalar::<_, i32>(
        "
            UPDATE comments
            SET num_children = num_children + 1
            WHERE id = $1
            AND path = $2
            AND num_children = $3
            RETURNING num_children
        ",
    )
    .bind(parent.0)
    .bind(parent_path)
    .bind(expected)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("incrementing reply counter of {parent:?}"))
}

#[async_trait]
impl<'a> Db for PostgresDb<'a> {
    async fn find_last_root_path(&mut self, post: PostId) -> anyhow::Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "
                SELECT path FROM comments
                WHERE post_id = $1
                AND depth = 1
                ORDER BY path DESC
                LIMIT 1
            ",
        )
        .bind(post.0)
        .fetch_optional(&mut *self.conn)
        .await
        .context("querying comments table")
    }

    async fn find_node(&mut self, id: CommentId, post: PostId) -> anyhow::Result<Option<Comment>> {
        Ok(sqlx::query_as::<_, CommentRow>(&format!(
            "SELECT {COLUMNS} FROM comments WHERE id = $1 AND post_id = $2"
        ))
        .bind(id.0)
        .bind(post.0)
        .fetch_optional(&mut *self.conn)
        .await
        .context("querying comments table")?
        .map(Comment::from))
    }

    async fn find_last_descendant_path_at_depth(
        &mut self,
        post: PostId,
        parent_path: &str,
        parent_depth: i32,
        bounds: &SubtreeBounds,
    ) -> anyhow::Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "
                SELECT path FROM comments
                WHERE post_id = $1
                AND depth = $2
                AND (path BETWEEN $3 AND $4 OR starts_with(path, $4))
                ORDER BY path DESC
                LIMIT 1
            ",
        )
        .bind(post.0)
        .bind(parent_depth + 1)
        .bind(bounds.lower.to_string())
        .bind(bounds.upper.to_string())
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("querying last reply to comment at {parent_path:?}"))
    }

    async fn scan_subtree(
        &mut self,
        post: PostId,
        depth: i32,
        bounds: &SubtreeBounds,
    ) -> anyhow::Result<Vec<Comment>> {
        Ok(sqlx::query_as::<_, CommentRow>(&format!(
            "
                SELECT {COLUMNS} FROM comments
                WHERE post_id = $1
                AND depth > $2
                AND (path BETWEEN $3 AND $4 OR starts_with(path, $4))
                ORDER BY path
            "
        ))
        .bind(post.0)
        .bind(depth)
        .bind(bounds.lower.to_string())
        .bind(bounds.upper.to_string())
        .fetch_all(&mut *self.conn)
        .await
        .context("scanning comments table")?
        .into_iter()
        .map(Comment::from)
        .collect())
    }

    async fn insert_node(&mut self, node: NewNode) -> anyhow::Result<Result<CommentId, Conflict>> {
        Ok(insert_node_in(&mut *self.conn, &node)
            .await?
            .map(CommentId)
            .ok_or(Conflict))
    }

    async fn conditional_increment_child_count(
        &mut self,
        parent: CommentId,
        parent_path: &str,
        expected: i32,
    ) -> anyhow::Result<Result<i32, Conflict>> {
        Ok(increment_in(&mut *self.conn, parent, parent_path, expected)
            .await?
            .ok_or(Conflict))
    }

    async fn insert_child(
        &mut self,
        parent: CommentId,
        parent_path: &str,
        expected: i32,
        node: NewNode,
    ) -> anyhow::Result<Result<(i32, CommentId), Conflict>> {
        // Dropping the transaction without committing rolls it back
        let mut tx = self
            .conn
            .begin()
            .await
            .context("starting reply transaction")?;
        let count = match increment_in(&mut *tx, parent, parent_path, expected).await? {
            Some(count) => count,
            None => return Ok(Err(Conflict)),
        };
        let id = match insert_node_in(&mut *tx, &node).await? {
            Some(id) => CommentId(id),
            None => return Ok(Err(Conflict)),
        };
        tx.commit().await.context("committing reply transaction")?;
        Ok(Ok((count, id)))
    }

    async fn mark_deleted(
        &mut self,
        id: CommentId,
        post: PostId,
    ) -> anyhow::Result<Option<Comment>> {
        Ok(sqlx::query_as::<_, CommentRow>(&format!(
            "
                UPDATE comments
                SET is_deleted = true
                WHERE id = $1
                AND post_id = $2
                RETURNING {COLUMNS}
            "
        ))
        .bind(id.0)
        .bind(post.0)
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("marking comment {id:?} deleted"))?
        .map(Comment::from))
    }

    async fn count_comments(&mut self, post: PostId) -> anyhow::Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM comments WHERE post_id = $1")
            .bind(post.0)
            .fetch_one(&mut *self.conn)
            .await
            .context("counting comments")
    }
}
