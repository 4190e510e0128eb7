use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use arbor_api::{CommentTree, TreeConfig, DEFAULT_ALPHABET};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

mod db;
mod error;
mod extractors;
mod fuzz;
mod handlers;

use error::Error;
use extractors::*;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, structopt::StructOpt)]
struct Opt {
    /// PostgreSQL connection string
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    /// Address to listen on
    #[structopt(long, env = "ARBOR_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Number of characters of each path segment
    #[structopt(long, env = "ARBOR_SEGMENT_WIDTH", default_value = "4")]
    segment_width: usize,

    /// Characters segments are written with, in increasing order
    #[structopt(long, env = "ARBOR_ALPHABET", default_value = DEFAULT_ALPHABET)]
    alphabet: String,

    /// Number of times a write that lost a race is attempted
    #[structopt(long, env = "ARBOR_MAX_ATTEMPTS", default_value = "3")]
    max_attempts: usize,

    /// Seconds after which a request is aborted
    #[structopt(long, env = "ARBOR_REQUEST_TIMEOUT_SECS", default_value = "10")]
    request_timeout_secs: u64,

    /// Size of the database connection pool
    #[structopt(long, default_value = "10")]
    max_connections: u32,
}

async fn create_sqlx_pool(url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    Ok(PgPool::new(
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .with_context(|| format!("Error opening database {:?}", url))?,
    ))
}

pub fn app(db: PgPool, tree: CommentTree, timeout: Duration) -> Router {
    let state = AppState {
        db,
        tree: Arc::new(tree),
    };
    Router::new()
        .route(
            "/api/posts/:post_id/comments",
            post(handlers::create_root_comment),
        )
        .route(
            "/api/posts/:post_id/comments/:comment_id",
            get(handlers::fetch_comment)
                .post(handlers::create_reply)
                .delete(handlers::delete_comment),
        )
        .route(
            "/api/posts/:post_id/comment-count",
            get(handlers::count_comments),
        )
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let config = TreeConfig::new(&opt.alphabet, opt.segment_width)
        .context("validating comment tree configuration")?
        .with_max_attempts(opt.max_attempts);
    tracing::info!(
        segment_width = config.segment_width(),
        capacity = config.capacity(),
        "comment tree configured"
    );

    let db = create_sqlx_pool(&opt.database_url, opt.max_connections).await?;
    MIGRATOR
        .run(&mut *db.acquire().await?)
        .await
        .context("running pending migrations")?;

    let app = app(
        db,
        CommentTree::new(config),
        Duration::from_secs(opt.request_timeout_secs),
    );

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
