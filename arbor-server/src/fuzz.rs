#![cfg(test)]

use arbor_api::{
    Comment, CommentId, Conflict, Db, Error as ApiError, NewMessage, PostId, TreeConfig, TreeError,
    UserId, AUTHOR_HEADER,
};
use arbor_mock_server::MockServer;
use async_recursion::async_recursion;
use bolero::generator::TypeGenerator;
use axum::{
    extract::FromRequestParts,
    http::{self, request},
};
use std::{
    cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path, time::Duration,
};
use tower::{Service, ServiceExt};

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

fn find_pg_runtime() -> Option<postgresfixture::runtime::Runtime> {
    let mut runtime = None;
    let mut best_version = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            match (&mut runtime, &mut best_version) {
                (None, None) => {
                    runtime = Some(r);
                    best_version = Some(v);
                }
                (Some(runtime), Some(best_version)) => {
                    if *best_version < v {
                        *runtime = r;
                        *best_version = v;
                    }
                }
                _ => unreachable!(),
            }
        }
    }
    runtime
}

/// Run `f` against a freshly-migrated database in a throw-away cluster
///
/// Does nothing if postgresql is not installed in path.
fn with_test_db(name: &str, f: impl FnOnce(&tokio::runtime::Runtime, PgPool)) {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt::try_init();
    }
    let pg_runtime = match find_pg_runtime() {
        Some(r) => r,
        None => {
            eprintln!("postgresql seems to not be installed in path, skipping {name}");
            return;
        }
    };
    let lockfile = tempfile::tempfile().expect("creating tempfile");
    let datadir = tempfile::tempdir().expect("creating tempdir");
    let datadir_path: &Path = datadir.as_ref();
    let cluster = postgresfixture::cluster::Cluster::new(datadir_path, pg_runtime);
    let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
    postgresfixture::coordinate::run_and_destroy(
        &cluster,
        lockfile.into(),
        AssertUnwindSafe(|| {
            cluster.createdb("test_db").expect("creating test_db database");
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed initializing tokio runtime");
            let pool = runtime.block_on(async move {
                let pool = create_sqlx_pool(
                    &format!("postgresql://?host={}&dbname=test_db", datadir_path),
                    4,
                )
                .await
                .expect("creating sqlx pool");
                MIGRATOR
                    .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                    .await
                    .expect("failed applying migrations");
                pool
            });
            f(&runtime, pool)
        }),
    )
    .expect("coordinating spinup and shutdown of the pg cluster");
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            with_test_db(stringify!($name), |runtime, pool| {
                let runtime = AssertUnwindSafe(runtime);
                let pool = AssertUnwindSafe(pool);
                bolero::check!()
                    .with_generator($gen)
                    .cloned()
                    .for_each(move |v| {
                        let pool = pool.clone();
                        // run the test
                        let idle_before = pool.num_idle();
                        let v_str = format!("{v:?}");
                        let idle_after_res: Result<usize, _> = {
                            let pool = pool.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on(async move {
                                    let () = $fn(pool.clone(), v).await;
                                    let mut idle_after = pool.num_idle();
                                    let wait_release_since = std::time::Instant::now();
                                    while idle_after < idle_before
                                        && wait_release_since.elapsed()
                                            <= std::time::Duration::from_secs(1)
                                    {
                                        tokio::task::yield_now().await;
                                        idle_after = pool.num_idle();
                                    }
                                    idle_after
                                })
                            }))
                        };
                        runtime.block_on(async move {
                            // cleanup
                            let mut conn =
                                pool.acquire().await.expect("getting db cleanup connection");
                            sqlx::query(include_str!("../reset-test-db.sql"))
                                .execute(&mut *conn)
                                .await
                                .expect("failed cleaning up database");
                        });
                        // resume the panics
                        match idle_after_res {
                            Err(e) => std::panic::resume_unwind(e),
                            Ok(idle_after) => assert!(
                                idle_after >= idle_before,
                                "test {} held onto pool after exiting test: before there were {idle_before} connections, and after there were {idle_after} with value {v_str}",
                                stringify!($name)
                            ),
                        }
                    });
            })
        }
    };
}

macro_rules! do_pg_test {
    ( $name:ident, $fn:expr ) => {
        #[test]
        fn $name() {
            with_test_db(stringify!($name), |runtime, pool| {
                let () = runtime.block_on($fn(pool));
            })
        }
    };
}

do_tokio_test!(fuzz_author_extractor, String, |value| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(AUTHOR_HEADER, value)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = Author::from_request_parts(&mut req, &()).await;
        match res {
            Ok(Author(UserId(id))) => assert_ne!(id, 0),
            Err(Error::Api(ApiError::Validation(_))) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

async fn author_of(value: Option<&str>) -> Result<UserId, ApiError> {
    let req = http::Request::builder().uri("/");
    let req = match value {
        Some(v) => req.header(AUTHOR_HEADER, v),
        None => req,
    };
    let mut parts = req.body(()).expect("building request").into_parts().0;
    match Author::from_request_parts(&mut parts, &()).await {
        Ok(Author(author)) => Ok(author),
        Err(Error::Api(e)) => Err(e),
        Err(Error::Anyhow(e)) => panic!("unexpected internal error {e:?}"),
    }
}

#[tokio::test]
async fn author_extractor() {
    assert_eq!(author_of(Some("42")).await, Ok(UserId(42)));
    assert_eq!(author_of(Some(" 7 ")).await, Ok(UserId(7)));
    assert_eq!(
        author_of(None).await,
        Err(ApiError::validation("missing author id"))
    );
    assert_eq!(
        author_of(Some("0")).await,
        Err(ApiError::validation("missing author id"))
    );
    assert_eq!(
        author_of(Some("bob")).await,
        Err(ApiError::validation("invalid author id \"bob\""))
    );
}

const POST: PostId = PostId(1);
const AUTHOR: UserId = UserId(3);

fn api_err<T: Debug>(res: Result<T, TreeError>) -> ApiError {
    match res {
        Err(TreeError::Api(e)) => e,
        r => panic!("expected an api error, got {r:?}"),
    }
}

do_pg_test!(postgres_tree_allocation, |pool: PgPool| async move {
    let tree = CommentTree::new(TreeConfig::default());
    let mut conn = pool.acquire().await.expect("acquiring connection");
    let mut db = conn.db();

    let mut roots = Vec::new();
    for expected in ["0001", "0002", "0003"] {
        let c = tree
            .create_root_comment(&mut db, POST, AUTHOR, "root")
            .await
            .expect("creating root comment");
        assert_eq!((c.path.as_str(), c.depth), (expected, 1));
        roots.push(c);
    }

    let child = tree
        .create_reply(&mut db, roots[0].id, POST, AUTHOR, "child")
        .await
        .expect("creating reply");
    assert_eq!((child.path.as_str(), child.depth), ("00010001", 2));
    let grandchild = tree
        .create_reply(&mut db, child.id, POST, AUTHOR, "grandchild")
        .await
        .expect("creating reply");
    assert_eq!(grandchild.path, "000100010001");
    let sibling = tree
        .create_reply(&mut db, roots[0].id, POST, AUTHOR, "sibling")
        .await
        .expect("creating reply");
    assert_eq!(sibling.path, "00010002");
    tree.create_reply(&mut db, roots[1].id, POST, AUTHOR, "elsewhere")
        .await
        .expect("creating reply");

    let res = tree
        .fetch_comment_with_replies(&mut db, roots[0].id, POST, true)
        .await
        .expect("fetching subtree");
    let paths = res.iter().map(|c| c.path.as_str()).collect::<Vec<_>>();
    assert_eq!(paths, ["0001", "00010001", "000100010001", "00010002"]);
    assert_eq!(res[0].num_children, 2);

    let deleted = tree
        .delete_comment(&mut db, child.id, POST)
        .await
        .expect("deleting comment");
    assert!(deleted.is_deleted);
    assert_eq!(deleted.num_children, 1);
    assert_eq!(deleted.path, child.path);
    let res = tree
        .fetch_comment_with_replies(&mut db, roots[0].id, POST, true)
        .await
        .expect("fetching subtree");
    assert_eq!(res.len(), 4);
    assert!(res[1].is_deleted);

    assert_eq!(tree.count_comments(&mut db, POST).await.unwrap(), 7);
    assert_eq!(
        api_err(
            tree.fetch_comment_with_replies(&mut db, roots[0].id, PostId(2), false)
                .await
        ),
        ApiError::NotFound(roots[0].id)
    );
});

do_pg_test!(postgres_conflicting_replies, |pool: PgPool| async move {
    let tree = CommentTree::new(TreeConfig::default());
    let mut conn_a = pool.acquire().await.expect("acquiring connection");
    let mut conn_b = pool.acquire().await.expect("acquiring connection");

    let parent = tree
        .create_root_comment(&mut conn_a.db(), POST, AUTHOR, "root")
        .await
        .expect("creating root comment");
    let a = tree
        .prepare_reply(&mut conn_a.db(), parent.id, POST, AUTHOR, "a")
        .await
        .expect("preparing reply");
    let b = tree
        .prepare_reply(&mut conn_b.db(), parent.id, POST, AUTHOR, "b")
        .await
        .expect("preparing reply");
    assert_eq!(a.node.path, b.node.path);

    tree.commit_reply(&mut conn_a.db(), a)
        .await
        .expect("committing first reply");
    assert_eq!(
        api_err(tree.commit_reply(&mut conn_b.db(), b).await),
        ApiError::ConcurrentModification
    );
    let b = tree
        .create_reply(&mut conn_b.db(), parent.id, POST, AUTHOR, "b")
        .await
        .expect("retrying reply");
    assert_eq!(b.path, "00010002");

    let res = tree
        .fetch_comment_with_replies(&mut conn_a.db(), parent.id, POST, true)
        .await
        .expect("fetching subtree");
    assert_eq!(res[0].num_children, 2);
    assert_eq!(res.len(), 3);
});

do_pg_test!(postgres_rejected_reply_leaves_no_trace, |pool: PgPool| async move {
    let tree = CommentTree::new(TreeConfig::default());
    let mut conn = pool.acquire().await.expect("acquiring connection");
    let parent = tree
        .create_root_comment(&mut conn.db(), POST, AUTHOR, "root")
        .await
        .expect("creating root comment");
    let a = tree
        .prepare_reply(&mut conn.db(), parent.id, POST, AUTHOR, "a")
        .await
        .expect("preparing reply");
    // someone else took the path without going through the parent's counter
    let mut squatter = a.node.clone();
    squatter.message = String::from("squatter");
    conn.db()
        .insert_node(squatter)
        .await
        .expect("inserting squatter")
        .expect("path was free");

    assert_eq!(
        api_err(tree.commit_reply(&mut conn.db(), a).await),
        ApiError::ConcurrentModification
    );
    // the counter increment was rolled back with the failed insert
    let res = tree
        .fetch_comment_with_replies(&mut conn.db(), parent.id, POST, false)
        .await
        .expect("fetching parent");
    assert_eq!(res[0].num_children, 0);
});

do_pg_test!(postgres_child_counter_is_compare_and_swap, |pool: PgPool| async move {
    let tree = CommentTree::new(TreeConfig::default());
    let mut conn = pool.acquire().await.expect("acquiring connection");
    let parent = tree
        .create_root_comment(&mut conn.db(), POST, AUTHOR, "root")
        .await
        .expect("creating root comment");
    let mut db = conn.db();
    let steps = [
        ("0001", 0, Ok(1)),
        ("0001", 0, Err(Conflict)),
        ("0002", 1, Err(Conflict)),
    ];
    for (path, expected, res) in steps {
        assert_eq!(
            db.conditional_increment_child_count(parent.id, path, expected)
                .await
                .expect("incrementing reply counter"),
            res
        );
    }
});

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    CreateRoot {
        post: u8,
        author: u8,
        message: String,
    },
    Reply {
        post: u8,
        parent: usize,
        author: u8,
        message: String,
    },
    Fetch {
        post: u8,
        comment: usize,
        replies: bool,
    },
    Delete {
        post: u8,
        comment: usize,
    },
    Count {
        post: u8,
    },
}

async fn call<Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &(dyn Debug + Sync),
) -> Result<Resp, ApiError>
where
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
            panic!(
                r#"
                    Failed parsing resp body!

                    The error is the following:
                    ---
                    {err}
                    ---

                    Response body is:
                    ---
                    {body:?}
                    ---

                    Request was:
                    ---
                    {req_body:?}
                    ---
                "#
            )
        }));
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

async fn run_on_app<Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    author: Option<UserId>,
    body: Option<&NewMessage>,
) -> Result<Resp, ApiError>
where
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match author {
        Some(author) => req.header(AUTHOR_HEADER, author.0.to_string()),
        None => req,
    };
    let req = req
        .body(match body {
            Some(body) => axum::body::Body::from(
                serde_json::to_vec(body).expect("serializing request body to json"),
            ),
            None => axum::body::Body::empty(),
        })
        .expect("building request");
    call(app, req, &(method, uri, body)).await
}

type Shape = (CommentId, PostId, UserId, String, i32, i32, String, bool);

/// Everything but the timestamps, which cannot match between app and mock
fn shape(c: Comment) -> Shape {
    (
        c.id,
        c.post_id,
        c.author_id,
        c.path,
        c.depth,
        c.num_children,
        c.message,
        c.is_deleted,
    )
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq,
{
    assert_eq!(
        app_res, mock_res,
        "app and mock did not return the same result for {name}"
    );
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

fn post_of(post: u8) -> PostId {
    // post 0 is invalid, and must be rejected the same way by both sides
    PostId(i64::from(post % 3))
}

fn author_of_fuzz(author: u8) -> UserId {
    UserId(i64::from(author % 4) + 1)
}

struct ComparativeFuzzer {
    app: Router,
    mock: MockServer,
}

impl ComparativeFuzzer {
    fn new(pool: PgPool) -> ComparativeFuzzer {
        ComparativeFuzzer {
            app: app(
                pool,
                CommentTree::new(TreeConfig::default()),
                Duration::from_secs(10),
            ),
            mock: MockServer::new(TreeConfig::default()),
        }
    }

    /// Pick a comment id, sometimes one that does not exist yet
    async fn comment_id(&self, fuzz_id: usize) -> Option<CommentId> {
        let num = self.mock.test_num_comments().await;
        resize_int(fuzz_id, ..num + 2).map(|i| CommentId(i as i64 + 1))
    }

    #[async_recursion(?Send)]
    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::CreateRoot {
                post,
                author,
                message,
            } => {
                let (post, author) = (post_of(post), author_of_fuzz(author));
                let body = NewMessage { message };
                compare(
                    "CreateRoot",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/posts/{}/comments", post.0),
                        Some(author),
                        Some(&body),
                    )
                    .await
                    .map(shape),
                    self.mock
                        .create_root_comment(post, author, &body.message)
                        .await
                        .map(shape),
                )
            }
            FuzzOp::Reply {
                post,
                parent,
                author,
                message,
            } => {
                if self.mock.test_num_comments().await == 0 {
                    self.execute_fuzz_op(FuzzOp::CreateRoot {
                        post,
                        author,
                        message: String::from("root"),
                    })
                    .await;
                }
                let Some(parent) = self.comment_id(parent).await else {
                    return;
                };
                let (post, author) = (post_of(post), author_of_fuzz(author));
                let body = NewMessage { message };
                compare(
                    "Reply",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &format!("/api/posts/{}/comments/{}", post.0, parent.0),
                        Some(author),
                        Some(&body),
                    )
                    .await
                    .map(shape),
                    self.mock
                        .create_reply(post, parent, author, &body.message)
                        .await
                        .map(shape),
                )
            }
            FuzzOp::Fetch {
                post,
                comment,
                replies,
            } => {
                let Some(id) = self.comment_id(comment).await else {
                    return;
                };
                let post = post_of(post);
                compare(
                    "Fetch",
                    run_on_app::<Vec<Comment>>(
                        &mut self.app,
                        "GET",
                        &format!("/api/posts/{}/comments/{}?replies={replies}", post.0, id.0),
                        Some(UserId(1)),
                        None,
                    )
                    .await
                    .map(|v| v.into_iter().map(shape).collect::<Vec<_>>()),
                    self.mock
                        .fetch_comment(post, id, replies)
                        .await
                        .map(|v| v.into_iter().map(shape).collect::<Vec<_>>()),
                )
            }
            FuzzOp::Delete { post, comment } => {
                let Some(id) = self.comment_id(comment).await else {
                    return;
                };
                let post = post_of(post);
                compare(
                    "Delete",
                    run_on_app(
                        &mut self.app,
                        "DELETE",
                        &format!("/api/posts/{}/comments/{}", post.0, id.0),
                        Some(UserId(1)),
                        None,
                    )
                    .await
                    .map(shape),
                    self.mock.delete_comment(post, id).await.map(shape),
                )
            }
            FuzzOp::Count { post } => {
                let post = post_of(post);
                compare(
                    "Count",
                    run_on_app::<i64>(
                        &mut self.app,
                        "GET",
                        &format!("/api/posts/{}/comment-count", post.0),
                        None,
                        None,
                    )
                    .await,
                    self.mock.count_comments(post).await,
                )
            }
        }
    }
}

do_sqlx_test!(
    compare_with_mock,
    bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..100usize),
    |pool, test: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool);
        for op in test {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);
