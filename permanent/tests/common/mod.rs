#![allow(dead_code)]

use chrono::NaiveDateTime;
use permanent::{Database, Permanent, Registry, Signals};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Permanent)]
#[permanent(table = "authors")]
pub struct Author {
    #[permanent(primary_key)]
    pub id: Option<i64>,
    pub name: String,
    #[permanent(marker)]
    pub removed: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Permanent)]
#[permanent(table = "books", restore_on_create)]
pub struct Book {
    pub id: Option<i64>,
    #[permanent(unique)]
    pub isbn: String,
    pub title: String,
    #[permanent(references = "authors")]
    pub author_id: i64,
    #[permanent(marker)]
    pub removed: Option<NaiveDateTime>,
    #[permanent(skip)]
    pub loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Permanent)]
pub struct Shelf {
    pub id: Option<i64>,
    pub label: String,
    #[permanent(references = "books", on_delete = "set_null")]
    pub book_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Permanent)]
#[permanent(table = "memos", label = "Memo")]
pub struct Memo {
    pub id: Option<i64>,
    pub body: String,
    #[permanent(marker = "flag")]
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Permanent)]
#[permanent(table = "badges")]
pub struct Badge {
    pub id: Option<i64>,
    #[permanent(unique)]
    pub code: String,
    #[permanent(marker = "unix_time")]
    pub deleted_at: i64,
}

pub const SCHEMA: &[&str] = &[
    "CREATE TABLE authors (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, removed DATETIME)",
    "CREATE TABLE books (id INTEGER PRIMARY KEY AUTOINCREMENT, isbn TEXT NOT NULL UNIQUE, title TEXT NOT NULL, author_id INTEGER NOT NULL REFERENCES authors(id), removed DATETIME)",
    "CREATE TABLE shelf (id INTEGER PRIMARY KEY AUTOINCREMENT, label TEXT NOT NULL, book_id INTEGER REFERENCES books(id))",
    "CREATE TABLE memos (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL, deleted BOOLEAN NOT NULL DEFAULT 0)",
    "CREATE TABLE badges (id INTEGER PRIMARY KEY AUTOINCREMENT, code TEXT NOT NULL UNIQUE, deleted_at INTEGER NOT NULL DEFAULT 0)",
];

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn registry() -> Registry {
    Registry::new()
        .register::<Author>()
        .register::<Book>()
        .register::<Shelf>()
        .register::<Memo>()
        .register::<Badge>()
}

pub fn author(name: &str) -> Author {
    Author {
        id: None,
        name: name.to_owned(),
        removed: None,
    }
}

pub fn book(isbn: &str, title: &str, author_id: i64) -> Book {
    Book {
        id: None,
        isbn: isbn.to_owned(),
        title: title.to_owned(),
        author_id,
        removed: None,
        loaded: false,
    }
}

pub fn badge(code: &str) -> Badge {
    Badge {
        id: None,
        code: code.to_owned(),
        deleted_at: 0,
    }
}

/// Counts restore signals per phase.
pub struct Counter {
    pub pre: Arc<AtomicUsize>,
    pub post: Arc<AtomicUsize>,
}

impl Counter {
    pub async fn connect(signals: &Signals) -> Counter {
        let pre = Arc::new(AtomicUsize::new(0));
        let post = Arc::new(AtomicUsize::new(0));
        let p = pre.clone();
        signals
            .pre_restore
            .connect(move |_| {
                p.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        let p = post.clone();
        signals
            .post_restore
            .connect(move |_| {
                p.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        Counter { pre, post }
    }

    pub fn pairs(&self) -> (usize, usize) {
        (
            self.pre.load(Ordering::SeqCst),
            self.post.load(Ordering::SeqCst),
        )
    }
}

pub async fn counter(db: &Database) -> Counter {
    Counter::connect(db.signals()).await
}
