//! End-to-end tour of the document store: register descriptors, save and
//! fetch entities across sessions, watch the reduce index track deletions.
//!
//! Run with: cargo run --example blog

use anyhow::Result;
use serde::{Deserialize, Serialize};
use vellumdb::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize, Persist)]
struct Post {
    id: i64,
    author: String,
    title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, IndexModel)]
struct PostsByAuthor {
    author: String,
    posts: i64,
}

fn registry() -> DescriptorRegistry {
    let mut registry = DescriptorRegistry::new();
    registry.register(
        IndexDescriptor::<Post, PostsByAuthor>::map(|post| {
            vec![PostsByAuthor {
                author: post.author.clone(),
                posts: 1,
            }]
        })
        .grouped_by("author")
        .reduce(|rows| {
            let author = rows.first()?.author.clone();
            Some(PostsByAuthor {
                author,
                posts: rows.iter().map(|row| row.posts).sum(),
            })
        })
        .on_delete(|current, deleted| {
            let posts = current.posts - deleted.iter().map(|row| row.posts).sum::<i64>();
            (posts > 0).then_some(PostsByAuthor { posts, ..current })
        }),
    );
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let store = DocumentStore::new(MemoryBackend::new(), registry());

    // First session: write a few posts.
    let mut session = store.open_session();
    let first = Tracked::new(Post {
        id: 0,
        author: "ada".into(),
        title: "On engines".into(),
    });
    session.save(&first)?;
    session.save(&Tracked::new(Post {
        id: 0,
        author: "ada".into(),
        title: "Notes, part two".into(),
    }))?;
    session.save(&Tracked::new(Post {
        id: 0,
        author: "brandes".into(),
        title: "Graph days".into(),
    }))?;

    // query() flushes pending work, so the counts are already visible here.
    let counts = session.query::<PostsByAuthor>().await?.list().await?;
    for row in &counts {
        println!("{}: {} post(s)", row.author, row.posts);
    }
    session.close().await?;

    let first_id = first.read()?.id;
    println!("first post got document id {first_id}");

    // Second session: fetch and delete the first post.
    let mut session = store.open_session();
    let posts = session.get::<Post>(&[first_id]).await?;
    println!("loaded '{}' for deletion", posts[0].read()?.title);
    session.delete(&posts[0])?;

    let ada = session
        .query::<PostsByAuthor>()
        .await?
        .filter_eq("author", "ada")?
        .first()
        .await?;
    match ada {
        Some(row) => println!("ada is down to {} post(s)", row.posts),
        None => println!("ada has no posts left"),
    }
    session.close().await?;

    Ok(())
}
