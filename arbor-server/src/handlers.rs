use std::sync::Arc;

use arbor_api::{Comment, CommentId, CommentTree, FetchOptions, NewMessage, PostId};
use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::{extractors::*, Error};

pub async fn create_root_comment(
    State(tree): State<Arc<CommentTree>>,
    Author(author): Author,
    mut conn: PgConn,
    Path(post): Path<i64>,
    Json(data): Json<NewMessage>,
) -> Result<Json<Comment>, Error> {
    Ok(Json(
        tree.create_root_comment(&mut conn.db(), PostId(post), author, &data.message)
            .await?,
    ))
}

pub async fn create_reply(
    State(tree): State<Arc<CommentTree>>,
    Author(author): Author,
    mut conn: PgConn,
    Path((post, parent)): Path<(i64, i64)>,
    Json(data): Json<NewMessage>,
) -> Result<Json<Comment>, Error> {
    Ok(Json(
        tree.create_reply(
            &mut conn.db(),
            CommentId(parent),
            PostId(post),
            author,
            &data.message,
        )
        .await?,
    ))
}

pub async fn fetch_comment(
    State(tree): State<Arc<CommentTree>>,
    _: Author,
    mut conn: PgConn,
    Path((post, id)): Path<(i64, i64)>,
    Query(opts): Query<FetchOptions>,
) -> Result<Json<Vec<Comment>>, Error> {
    Ok(Json(
        tree.fetch_comment_with_replies(&mut conn.db(), CommentId(id), PostId(post), opts.replies)
            .await?,
    ))
}

pub async fn delete_comment(
    State(tree): State<Arc<CommentTree>>,
    Author(author): Author,
    mut conn: PgConn,
    Path((post, id)): Path<(i64, i64)>,
) -> Result<Json<Comment>, Error> {
    let res = tree
        .delete_comment(&mut conn.db(), CommentId(id), PostId(post))
        .await?;
    tracing::info!(?author, ?res.id, "comment deleted");
    Ok(Json(res))
}

pub async fn count_comments(
    State(tree): State<Arc<CommentTree>>,
    mut conn: PgConn,
    Path(post): Path<i64>,
) -> Result<Json<i64>, Error> {
    Ok(Json(tree.count_comments(&mut conn.db(), PostId(post)).await?))
}
