use anyhow::Context;
use arbor_api::{Comment, Error as ApiError, NewMessage, AUTHOR_HEADER};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    /// User on behalf of whom requests are made
    #[structopt(short, long, env = "ARBOR_AUTHOR_ID")]
    author: i64,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Post a new top-level comment
    Comment { post: i64, message: String },

    /// Reply to a comment
    Reply {
        post: i64,
        parent: i64,
        message: String,
    },

    /// Show a comment, and optionally its replies
    Show {
        post: i64,
        comment: i64,

        #[structopt(short, long)]
        replies: bool,
    },

    /// Soft-delete a comment
    Delete { post: i64, comment: i64 },

    /// Count the comments of a post
    Count { post: i64 },
}

async fn send<T>(req: reqwest::RequestBuilder) -> anyhow::Result<T>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let resp = req.send().await.context("sending request")?;
    if resp.status().is_success() {
        return resp.json().await.context("parsing response");
    }
    let body = resp.bytes().await.context("reading error response")?;
    let err = ApiError::parse(&body).context("parsing error response")?;
    Err(err).context("server refused the request")
}

fn print_comment(c: &Comment) {
    let indent = "  ".repeat(usize::try_from(c.depth - 1).unwrap_or(0));
    let message = match c.is_deleted {
        true => "[deleted]",
        false => &c.message,
    };
    println!(
        "{indent}#{} by {} on {} ({} replies): {message}",
        c.id.0, c.author_id.0, c.created_at, c.num_children
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();

    let client = reqwest::Client::new();
    let posts = format!("{}/api/posts", opt.host);
    let author = opt.author.to_string();

    match opt.cmd {
        Command::Comment { post, message } => {
            let c: Comment = send(
                client
                    .post(format!("{posts}/{post}/comments"))
                    .header(AUTHOR_HEADER, &author)
                    .json(&NewMessage { message }),
            )
            .await?;
            print_comment(&c);
        }
        Command::Reply {
            post,
            parent,
            message,
        } => {
            let c: Comment = send(
                client
                    .post(format!("{posts}/{post}/comments/{parent}"))
                    .header(AUTHOR_HEADER, &author)
                    .json(&NewMessage { message }),
            )
            .await?;
            print_comment(&c);
        }
        Command::Show {
            post,
            comment,
            replies,
        } => {
            let comments: Vec<Comment> = send(
                client
                    .get(format!("{posts}/{post}/comments/{comment}"))
                    .query(&[("replies", replies)])
                    .header(AUTHOR_HEADER, &author),
            )
            .await?;
            for c in &comments {
                print_comment(c);
            }
        }
        Command::Delete { post, comment } => {
            let c: Comment = send(
                client
                    .delete(format!("{posts}/{post}/comments/{comment}"))
                    .header(AUTHOR_HEADER, &author),
            )
            .await?;
            print_comment(&c);
        }
        Command::Count { post } => {
            let count: i64 =
                send(client.get(format!("{posts}/{post}/comment-count"))).await?;
            println!("{count}");
        }
    }

    Ok(())
}
