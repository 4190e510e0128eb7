#![cfg(test)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use arbor_api::{
    Comment, CommentId, CommentTree, Conflict, Db, Error, NewNode, PostId, SubtreeBounds,
    TreeConfig, TreeError, UserId,
};
use async_trait::async_trait;

use crate::MemDb;

const POST: PostId = PostId(1);
const AUTHOR: UserId = UserId(7);

fn tree() -> CommentTree {
    CommentTree::new(TreeConfig::default())
}

fn api_err<T: std::fmt::Debug>(res: Result<T, TreeError>) -> Error {
    match res {
        Err(TreeError::Api(e)) => e,
        r => panic!("expected an api error, got {r:?}"),
    }
}

fn paths(comments: &[Comment]) -> Vec<&str> {
    comments.iter().map(|c| c.path.as_str()).collect()
}

async fn root(t: &CommentTree, db: &mut MemDb) -> Comment {
    t.create_root_comment(db, POST, AUTHOR, "root")
        .await
        .expect("creating root comment")
}

async fn reply(t: &CommentTree, db: &mut MemDb, parent: CommentId) -> Comment {
    t.create_reply(db, parent, POST, AUTHOR, "reply")
        .await
        .expect("creating reply")
}

async fn reload(t: &CommentTree, db: &mut MemDb, id: CommentId) -> Comment {
    t.fetch_comment_with_replies(db, id, POST, false)
        .await
        .expect("reloading comment")
        .remove(0)
}

#[tokio::test]
async fn sequential_roots() {
    let (t, mut db) = (tree(), MemDb::new());
    for expected in ["0001", "0002", "0003"] {
        let c = root(&t, &mut db).await;
        assert_eq!(c.path, expected);
        assert_eq!(c.depth, 1);
        assert_eq!(c.num_children, 0);
        assert_eq!(c.created_at, c.updated_at);
        assert!(!c.is_deleted);
    }
}

#[tokio::test]
async fn roots_are_allocated_per_post() {
    let (t, mut db) = (tree(), MemDb::new());
    root(&t, &mut db).await;
    let other = t
        .create_root_comment(&mut db, PostId(2), AUTHOR, "elsewhere")
        .await
        .unwrap();
    assert_eq!(other.path, "0001");
    assert_eq!(root(&t, &mut db).await.path, "0002");
}

#[tokio::test]
async fn replies_extend_the_parent_path() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;

    let first = reply(&t, &mut db, parent.id).await;
    assert_eq!(first.path, "00010001");
    assert_eq!(first.depth, 2);
    assert_eq!(reload(&t, &mut db, parent.id).await.num_children, 1);

    let second = reply(&t, &mut db, parent.id).await;
    assert_eq!(second.path, "00010002");
    assert_eq!(second.depth, 2);
    assert_eq!(reload(&t, &mut db, parent.id).await.num_children, 2);
}

#[tokio::test]
async fn next_reply_skips_grandchildren() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;
    let child = reply(&t, &mut db, parent.id).await;
    let grandchild = reply(&t, &mut db, child.id).await;
    assert_eq!(grandchild.path, "000100010001");
    assert_eq!(grandchild.depth, 3);

    // the deepest path under the parent is the grandchild's, yet the new
    // reply must be a sibling of the child
    let second = reply(&t, &mut db, parent.id).await;
    assert_eq!(second.path, "00010002");
}

#[tokio::test]
async fn subtree_scan_scope() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;
    let unrelated = root(&t, &mut db).await;
    let child = reply(&t, &mut db, parent.id).await;
    reply(&t, &mut db, parent.id).await;
    reply(&t, &mut db, child.id).await;
    reply(&t, &mut db, unrelated.id).await;

    let res = t
        .fetch_comment_with_replies(&mut db, parent.id, POST, true)
        .await
        .unwrap();
    assert_eq!(
        paths(&res),
        ["0001", "00010001", "000100010001", "00010002"]
    );

    let alone = t
        .fetch_comment_with_replies(&mut db, parent.id, POST, false)
        .await
        .unwrap();
    assert_eq!(paths(&alone), ["0001"]);

    let leaf = t
        .fetch_comment_with_replies(&mut db, res[3].id, POST, true)
        .await
        .unwrap();
    assert_eq!(paths(&leaf), ["00010002"]);
}

#[tokio::test]
async fn stale_reply_commit_is_rejected() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;

    let a = t
        .prepare_reply(&mut db, parent.id, POST, AUTHOR, "a")
        .await
        .unwrap();
    let b = t
        .prepare_reply(&mut db, parent.id, POST, UserId(8), "b")
        .await
        .unwrap();
    assert_eq!(a.node.path, b.node.path);
    assert_eq!(a.expected_children, 0);

    let a = t.commit_reply(&mut db, a).await.unwrap();
    assert_eq!(
        api_err(t.commit_reply(&mut db, b).await),
        Error::ConcurrentModification
    );

    let b = t
        .create_reply(&mut db, parent.id, POST, UserId(8), "b")
        .await
        .unwrap();
    assert_eq!(a.path, "00010001");
    assert_eq!(b.path, "00010002");
    assert_eq!(reload(&t, &mut db, parent.id).await.num_children, 2);
    assert_eq!(db.test_num_comments().await, 3);
}

/// Hands control back to the executor before each store call, so that two
/// operations joined on the same task interleave their reads and writes
#[derive(Clone)]
struct Interleaved {
    db: MemDb,
    conflicts: Arc<AtomicUsize>,
}

impl Interleaved {
    fn new(db: &MemDb) -> Interleaved {
        Interleaved {
            db: db.clone(),
            conflicts: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }

    fn record<T>(&self, res: &anyhow::Result<Result<T, Conflict>>) {
        if let Ok(Err(Conflict)) = res {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Db for Interleaved {
    async fn find_last_root_path(&mut self, post: PostId) -> anyhow::Result<Option<String>> {
        tokio::task::yield_now().await;
        self.db.find_last_root_path(post).await
    }

    async fn find_node(&mut self, id: CommentId, post: PostId) -> anyhow::Result<Option<Comment>> {
        tokio::task::yield_now().await;
        self.db.find_node(id, post).await
    }

    async fn find_last_descendant_path_at_depth(
        &mut self,
        post: PostId,
        parent_path: &str,
        parent_depth: i32,
        bounds: &SubtreeBounds,
    ) -> anyhow::Result<Option<String>> {
        tokio::task::yield_now().await;
        self.db
            .find_last_descendant_path_at_depth(post, parent_path, parent_depth, bounds)
            .await
    }

    async fn scan_subtree(
        &mut self,
        post: PostId,
        depth: i32,
        bounds: &SubtreeBounds,
    ) -> anyhow::Result<Vec<Comment>> {
        tokio::task::yield_now().await;
        self.db.scan_subtree(post, depth, bounds).await
    }

    async fn insert_node(&mut self, node: NewNode) -> anyhow::Result<Result<CommentId, Conflict>> {
        tokio::task::yield_now().await;
        let res = self.db.insert_node(node).await;
        self.record(&res);
        res
    }

    async fn conditional_increment_child_count(
        &mut self,
        parent: CommentId,
        parent_path: &str,
        expected: i32,
    ) -> anyhow::Result<Result<i32, Conflict>> {
        tokio::task::yield_now().await;
        let res = self
            .db
            .conditional_increment_child_count(parent, parent_path, expected)
            .await;
        self.record(&res);
        res
    }

    async fn insert_child(
        &mut self,
        parent: CommentId,
        parent_path: &str,
        expected: i32,
        node: NewNode,
    ) -> anyhow::Result<Result<(i32, CommentId), Conflict>> {
        tokio::task::yield_now().await;
        let res = self
            .db
            .insert_child(parent, parent_path, expected, node)
            .await;
        self.record(&res);
        res
    }

    async fn mark_deleted(
        &mut self,
        id: CommentId,
        post: PostId,
    ) -> anyhow::Result<Option<Comment>> {
        tokio::task::yield_now().await;
        self.db.mark_deleted(id, post).await
    }

    async fn count_comments(&mut self, post: PostId) -> anyhow::Result<i64> {
        tokio::task::yield_now().await;
        self.db.count_comments(post).await
    }
}

#[tokio::test]
async fn concurrent_replies_all_land() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;

    let mut db_a = Interleaved::new(&db);
    let mut db_b = db_a.clone();
    let (a, b) = futures::join!(
        t.create_reply(&mut db_a, parent.id, POST, AUTHOR, "a"),
        t.create_reply(&mut db_b, parent.id, POST, AUTHOR, "b"),
    );
    assert!(db_a.conflicts() >= 1);
    let mut got = vec![a.unwrap().path, b.unwrap().path];
    got.sort();
    assert_eq!(got, ["00010001", "00010002"]);
    assert_eq!(reload(&t, &mut db, parent.id).await.num_children, 2);
    assert_eq!(db.test_num_comments().await, 3);
}

#[tokio::test]
async fn lost_race_without_retries_is_reported() {
    let t = CommentTree::new(TreeConfig::default().with_max_attempts(1));
    let mut db = MemDb::new();
    let parent = root(&t, &mut db).await;

    let mut db_a = Interleaved::new(&db);
    let mut db_b = db_a.clone();
    let (a, b) = futures::join!(
        t.create_reply(&mut db_a, parent.id, POST, AUTHOR, "a"),
        t.create_reply(&mut db_b, parent.id, POST, AUTHOR, "b"),
    );
    assert_eq!(db_a.conflicts(), 1);
    let (won, lost) = match (a, b) {
        (Ok(won), lost @ Err(_)) | (lost @ Err(_), Ok(won)) => (won, lost),
        r => panic!("expected exactly one reply to land, got {r:?}"),
    };
    assert_eq!(won.path, "00010001");
    assert_eq!(api_err(lost), Error::ConcurrentModification);
    // the losing attempt left neither a node nor a counter bump behind
    assert_eq!(reload(&t, &mut db, parent.id).await.num_children, 1);
    assert_eq!(db.test_num_comments().await, 2);
}

#[tokio::test]
async fn concurrent_roots_are_retried() {
    let (t, db) = (tree(), MemDb::new());

    let mut db_a = Interleaved::new(&db);
    let mut db_b = db_a.clone();
    let (a, b) = futures::join!(
        t.create_root_comment(&mut db_a, POST, AUTHOR, "a"),
        t.create_root_comment(&mut db_b, POST, AUTHOR, "b"),
    );
    assert!(db_a.conflicts() >= 1);
    let mut got = vec![a.unwrap().path, b.unwrap().path];
    got.sort();
    assert_eq!(got, ["0001", "0002"]);
    assert_eq!(db.test_num_comments().await, 2);
}

#[tokio::test]
async fn lost_root_race_without_retries_is_reported() {
    let t = CommentTree::new(TreeConfig::default().with_max_attempts(1));
    let db = MemDb::new();

    let mut db_a = Interleaved::new(&db);
    let mut db_b = db_a.clone();
    let (a, b) = futures::join!(
        t.create_root_comment(&mut db_a, POST, AUTHOR, "a"),
        t.create_root_comment(&mut db_b, POST, AUTHOR, "b"),
    );
    let lost = match (a, b) {
        (Ok(won), lost @ Err(_)) | (lost @ Err(_), Ok(won)) => {
            assert_eq!(won.path, "0001");
            lost
        }
        r => panic!("expected exactly one root to land, got {r:?}"),
    };
    assert_eq!(api_err(lost), Error::ConcurrentModification);
    assert_eq!(db.test_num_comments().await, 1);
}

#[tokio::test]
async fn child_counter_is_compare_and_swap() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;

    assert_eq!(
        db.conditional_increment_child_count(parent.id, &parent.path, 0)
            .await
            .unwrap(),
        Ok(1)
    );
    assert_eq!(
        db.conditional_increment_child_count(parent.id, &parent.path, 0)
            .await
            .unwrap(),
        Err(Conflict)
    );
    assert_eq!(
        db.conditional_increment_child_count(parent.id, "0002", 1)
            .await
            .unwrap(),
        Err(Conflict)
    );
    assert_eq!(reload(&t, &mut db, parent.id).await.num_children, 1);
}

#[tokio::test]
async fn soft_delete_keeps_the_tree() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;
    let child = reply(&t, &mut db, parent.id).await;
    reply(&t, &mut db, child.id).await;

    let deleted = t.delete_comment(&mut db, child.id, POST).await.unwrap();
    assert!(deleted.is_deleted);
    assert_eq!(deleted.path, child.path);
    assert_eq!(deleted.depth, child.depth);
    assert_eq!(deleted.num_children, 1);

    let res = t
        .fetch_comment_with_replies(&mut db, parent.id, POST, true)
        .await
        .unwrap();
    assert_eq!(paths(&res), ["0001", "00010001", "000100010001"]);
    assert!(res[1].is_deleted);
    assert!(!res[2].is_deleted);

    // replies to a deleted comment are still allowed
    assert_eq!(reply(&t, &mut db, child.id).await.path, "000100010002");
}

#[tokio::test]
async fn invalid_requests() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;
    for msg in ["", "  \n\t "] {
        assert!(matches!(
            api_err(t.create_root_comment(&mut db, POST, AUTHOR, msg).await),
            Error::Validation(_)
        ));
        assert!(matches!(
            api_err(t.create_reply(&mut db, parent.id, POST, AUTHOR, msg).await),
            Error::Validation(_)
        ));
    }
    assert!(matches!(
        api_err(t.create_root_comment(&mut db, POST, AUTHOR, "a\0b").await),
        Error::Validation(_)
    ));
    assert_eq!(
        api_err(t.create_root_comment(&mut db, PostId(0), AUTHOR, "hi").await),
        Error::validation("missing post id")
    );
    assert_eq!(
        api_err(t.create_reply(&mut db, parent.id, POST, UserId(0), "hi").await),
        Error::validation("missing author id")
    );
    assert_eq!(
        api_err(t.delete_comment(&mut db, CommentId(0), POST).await),
        Error::validation("missing comment id")
    );
    assert_eq!(db.test_num_comments().await, 1);
}

#[tokio::test]
async fn messages_are_trimmed() {
    let (t, mut db) = (tree(), MemDb::new());
    let c = t
        .create_root_comment(&mut db, POST, AUTHOR, "  hello  ")
        .await
        .unwrap();
    assert_eq!(c.message, "hello");
}

#[tokio::test]
async fn missing_comments() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;
    let missing = CommentId(parent.id.0 + 1);
    assert_eq!(
        api_err(t.create_reply(&mut db, missing, POST, AUTHOR, "hi").await),
        Error::NotFound(missing)
    );
    assert_eq!(
        api_err(t.create_reply(&mut db, parent.id, PostId(2), AUTHOR, "hi").await),
        Error::NotFound(parent.id)
    );
    assert_eq!(
        api_err(t.fetch_comment_with_replies(&mut db, missing, POST, true).await),
        Error::NotFound(missing)
    );
    assert_eq!(
        api_err(t.delete_comment(&mut db, parent.id, PostId(2)).await),
        Error::NotFound(parent.id)
    );
}

#[tokio::test]
async fn counter_without_children_is_inconsistent() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;
    db.test_set_num_children(parent.id, 1).await;
    assert!(matches!(
        api_err(t.create_reply(&mut db, parent.id, POST, AUTHOR, "hi").await),
        Error::InconsistentState(_)
    ));
    assert_eq!(db.test_num_comments().await, 1);
}

#[tokio::test]
async fn corrupted_paths_are_reported() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;
    db.test_set_path(parent.id, "00!1").await;
    assert_eq!(
        api_err(t.create_root_comment(&mut db, POST, AUTHOR, "hi").await),
        Error::MalformedSegment(String::from("00!1"))
    );
    assert_eq!(
        api_err(t.create_reply(&mut db, parent.id, POST, AUTHOR, "hi").await),
        Error::MalformedSegment(String::from("00!1"))
    );
}

#[tokio::test]
async fn siblings_overflow() {
    let t = CommentTree::new(TreeConfig::new("01", 1).unwrap());
    let mut db = MemDb::new();
    let first = root(&t, &mut db).await;
    assert_eq!(first.path, "1");
    assert_eq!(
        api_err(t.create_root_comment(&mut db, POST, AUTHOR, "hi").await),
        Error::Overflow(2)
    );
    assert_eq!(reply(&t, &mut db, first.id).await.path, "11");
    assert_eq!(
        api_err(t.create_reply(&mut db, first.id, POST, AUTHOR, "hi").await),
        Error::Overflow(2)
    );
    assert_eq!(reload(&t, &mut db, first.id).await.num_children, 1);
}

#[tokio::test]
async fn highest_sibling_keeps_its_replies() {
    let t = CommentTree::new(TreeConfig::new("012", 1).unwrap());
    let mut db = MemDb::new();
    let parent = root(&t, &mut db).await;
    reply(&t, &mut db, parent.id).await;
    let last = reply(&t, &mut db, parent.id).await;
    assert_eq!(last.path, "12");
    reply(&t, &mut db, last.id).await;
    let res = t
        .fetch_comment_with_replies(&mut db, parent.id, POST, true)
        .await
        .unwrap();
    assert_eq!(paths(&res), ["1", "11", "12", "121"]);
}

#[tokio::test]
async fn comments_are_counted_per_post() {
    let (t, mut db) = (tree(), MemDb::new());
    let parent = root(&t, &mut db).await;
    let child = reply(&t, &mut db, parent.id).await;
    t.delete_comment(&mut db, child.id, POST).await.unwrap();
    t.create_root_comment(&mut db, PostId(2), AUTHOR, "hi")
        .await
        .unwrap();
    assert_eq!(t.count_comments(&mut db, POST).await.unwrap(), 2);
    assert_eq!(t.count_comments(&mut db, PostId(3)).await.unwrap(), 0);
}
