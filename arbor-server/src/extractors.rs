use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use anyhow::Context;
use arbor_api::{CommentTree, UserId, AUTHOR_HEADER};
use axum::{async_trait, extract::FromRequestParts, http::request};

use crate::{db::PostgresDb, Error};

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub db: PgPool,
    pub tree: Arc<CommentTree>,
}

#[derive(Clone)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    pub fn new(pool: sqlx::PgPool) -> PgPool {
        PgPool(pool)
    }

    pub async fn acquire(&self) -> Result<PgConn, Error> {
        Ok(PgConn(
            self.0.acquire().await.context("acquiring db connection")?,
        ))
    }

    pub fn num_idle(&self) -> usize {
        self.0.num_idle()
    }
}

pub struct PgConn(sqlx::pool::PoolConnection<sqlx::Postgres>);

impl PgConn {
    pub fn db(&mut self) -> PostgresDb<'_> {
        PostgresDb { conn: &mut **self }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for PgConn {
    type Rejection = Error;

    async fn from_request_parts(
        _req: &mut request::Parts,
        state: &AppState,
    ) -> Result<PgConn, Error> {
        state.db.acquire().await
    }
}

impl Deref for PgConn {
    type Target = sqlx::PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Author of the request, as authenticated by the layer in front of this
/// server
pub struct Author(pub UserId);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for Author {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<Author, Error> {
        let value = req
            .headers
            .get(AUTHOR_HEADER)
            .ok_or_else(Error::missing_author)?;
        let value = value
            .to_str()
            .map_err(|_| Error::invalid_author(&String::from_utf8_lossy(value.as_bytes())))?;
        let id = value
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::invalid_author(value))?;
        if id == 0 {
            return Err(Error::missing_author());
        }
        Ok(Author(UserId(id)))
    }
}
