use arbor_api::{Path, PathAlgebra, Time, TreeConfig};
use chrono::{Duration, Utc};
use rand::Rng;

const NUM_POSTS: i64 = 5;
const NUM_USERS: i64 = 20;

const MAX_ROOTS_PER_POST: u64 = 30;
const MAX_CHILDREN: u64 = 6;
const MAX_DEPTH: usize = 6;

const MIN_MESSAGE_WORDS: usize = 3;
const MAX_MESSAGE_WORDS: usize = 60;

struct Row {
    post: i64,
    author: i64,
    path: Path,
    num_children: u64,
    message: String,
    date: Time,
    is_deleted: bool,
}

fn gen_n_items<T>(table: &str, columns: &str, items: &[T], f: impl Fn(&T) -> String) {
    if items.is_empty() {
        return;
    }
    println!("INSERT INTO {} ({}) VALUES", table, columns);
    for (i, item) in items.iter().enumerate() {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(item));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn gen_message(rng: &mut impl Rng) -> String {
    lipsum::lipsum_words(rng.gen_range(MIN_MESSAGE_WORDS..=MAX_MESSAGE_WORDS)).replace('\'', "''")
}

/// Push `path` and a random subtree below it, children after their parent
fn gen_subtree(
    rng: &mut impl Rng,
    paths: &PathAlgebra,
    rows: &mut Vec<Row>,
    post: i64,
    path: Path,
    date: Time,
) {
    // deeper comments get fewer replies
    let num_children = match path.depth() < MAX_DEPTH {
        true => rng.gen_range(0..=MAX_CHILDREN / path.depth() as u64),
        false => 0,
    };
    rows.push(Row {
        post,
        author: rng.gen_range(1..=NUM_USERS),
        path: path.clone(),
        num_children,
        message: gen_message(rng),
        date,
        is_deleted: rng.gen_ratio(1, 20),
    });
    let mut child = None;
    for _ in 0..num_children {
        let next = match child {
            None => paths.first_child_path(&path),
            Some(ref prev) => paths.next_sibling_path(prev),
        }
        .expect("test data does not overflow a segment");
        let child_date = date + Duration::minutes(rng.gen_range(1..600));
        gen_subtree(rng, paths, rows, post, next.clone(), child_date);
        child = Some(next);
    }
}

fn main() {
    let mut rng = rand::thread_rng();
    let paths = PathAlgebra::new(TreeConfig::default());
    let now = Utc::now();

    let mut rows = Vec::new();
    for post in 1..=NUM_POSTS {
        for root in 1..=rng.gen_range(1..=MAX_ROOTS_PER_POST) {
            let path = paths.root_path(root).expect("test data does not overflow a segment");
            let date = now - Duration::days(rng.gen_range(1..365));
            gen_subtree(&mut rng, &paths, &mut rows, post, path, date);
        }
    }

    gen_n_items(
        "comments",
        "post_id, author_id, path, depth, num_children, message, created_at, updated_at, is_deleted",
        &rows,
        |r| {
            format!(
                "({}, {}, '{}', {}, {}, '{}', '{}', '{}', {})",
                r.post,
                r.author,
                r.path,
                r.path.depth(),
                r.num_children,
                r.message,
                r.date,
                r.date,
                r.is_deleted,
            )
        },
    );
}
