mod common;

use anyhow::Result;
use common::*;
use permanent::err::{PreconditionError, ProtectedError, RowNotFound};
use permanent::{
    cond, Backend, ColumnType, Database, MemoryBackend, Model, ModelMeta, PermanentModel, QuerySet,
    ReferenceOption, Registry, SoftDelete, Value, ViewKind,
};
use std::sync::Arc;

async fn setup() -> Result<(Database, Arc<MemoryBackend>)> {
    init();
    let backend = Arc::new(MemoryBackend::new());
    let db = Database::from_arc(backend.clone()).with_registry(registry());
    let herbert = Author::objects(&db).create(&author("Herbert")).await?;
    let le_guin = Author::objects(&db).create(&author("Le Guin")).await?;
    let (h, l) = (herbert.id.unwrap(), le_guin.id.unwrap());
    Book::objects(&db).create(&book("0-441", "Dune", h)).await?;
    Book::objects(&db).create(&book("0-442", "Dune Messiah", h)).await?;
    Book::objects(&db).create(&book("0-553", "The Dispossessed", l)).await?;
    Ok((db, backend))
}

#[test]
fn test_derive() {
    let meta: &ModelMeta = Book::meta();
    assert_eq!(meta.table, "books");
    assert_eq!(meta.label, "Book");
    assert_eq!(meta.primary_key, "id");
    assert!(meta.restore_on_create);
    assert_eq!(meta.column_meta("isbn").map(|c| c.unique), Some(true));
    assert_eq!(meta.column_meta("removed").map(|c| c.ty), Some(ColumnType::DateTime));
    assert!(!meta.has_column("loaded"));
    assert_eq!(meta.foreign_keys[0].references, "authors");
    assert_eq!(meta.foreign_keys[0].on_delete, ReferenceOption::Cascade);
    assert_eq!(meta.marker.as_ref().map(|m| m.field.as_str()), Some("removed"));

    assert_eq!(Shelf::meta().table, "shelf");
    assert!(!Shelf::meta().is_permanent());
    assert_eq!(Shelf::meta().foreign_keys[0].on_delete, ReferenceOption::SetNull);

    let memo = Memo::meta();
    assert_eq!(memo.label, "Memo");
    assert_eq!(memo.marker.as_ref().map(|m| m.kind), Some(SoftDelete::Flag));
    assert_eq!(memo.marker.as_ref().map(|m| m.alive.clone()), Some(Value::Bool(false)));
}

#[tokio::test]
async fn test_soft_delete_views() -> Result<()> {
    let (db, _) = setup().await?;
    let dune = Book::objects(&db).get(cond!(title = "Dune")).await?;
    dune.delete(&db, false).await?;

    let err = Book::objects(&db).get(cond!(id = dune.id)).await.unwrap_err();
    assert!(err.downcast_ref::<RowNotFound>().is_some());
    let deleted = Book::deleted_objects(&db).get(cond!(id = dune.id)).await?;
    assert_eq!(deleted.title, "Dune");
    let all = Book::all_objects(&db).get(cond!(id = dune.id)).await?;
    assert!(all.removed.is_some());
    assert!(all.is_deleted());
    Ok(())
}

#[tokio::test]
async fn test_restore_is_idempotent() -> Result<()> {
    let (db, _) = setup().await?;
    let counter = counter(&db).await;
    let dune = Book::objects(&db).get(cond!(title = "Dune")).await?;
    dune.delete(&db, false).await?;

    let mut dune = Book::deleted_objects(&db).get(cond!(id = dune.id)).await?;
    assert!(dune.restore(&db).await?);
    assert_eq!(counter.pairs(), (1, 1));
    assert!(!dune.restore(&db).await?);
    assert_eq!(counter.pairs(), (1, 1));

    let alive = Book::objects(&db).get(cond!(id = dune.id)).await?;
    assert_eq!(alive.removed, None);
    assert_eq!(alive, dune);
    let err = Book::deleted_objects(&db)
        .get(cond!(id = dune.id))
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<RowNotFound>().is_some());
    Ok(())
}

#[tokio::test]
async fn test_cascade() -> Result<()> {
    let (db, _) = setup().await?;
    let shelf = Shelf::objects(&db)
        .create(&Shelf {
            id: None,
            label: "top".into(),
            book_id: Some(1),
        })
        .await?;
    let mut herbert = Author::objects(&db).get(cond!(name = "Herbert")).await?;
    let (total, counts) = herbert.delete(&db, false).await?;
    assert_eq!(total, 3);
    assert_eq!(counts.get("Author"), Some(&1));
    assert_eq!(counts.get("Book"), Some(&2));
    assert_eq!(Book::objects(&db).count().await?, 1);
    let shelf = Shelf::objects(&db).get(cond!(id = shelf.id)).await?;
    assert_eq!(shelf.book_id, None);

    herbert = Author::all_objects(&db).get(cond!(id = herbert.id)).await?;
    assert!(herbert.restore(&db).await?);
    assert_eq!(Author::objects(&db).count().await?, 2);
    // dependents stay deleted
    assert_eq!(
        Book::deleted_objects(&db)
            .filter(cond!(author_id = herbert.id))
            .count()
            .await?,
        2
    );
    Ok(())
}

#[tokio::test]
async fn test_restrict() -> Result<()> {
    init();
    let registry = registry().register_meta(
        ModelMeta::new("editions")
            .column("id", ColumnType::Int)
            .column("book_id", ColumnType::Int)
            .foreign_key("book_id", "books", ReferenceOption::Restrict),
    );
    let db = Database::new(MemoryBackend::new()).with_registry(registry);
    let a = Author::objects(&db).create(&author("Banks")).await?;
    let b = Book::objects(&db)
        .create(&book("1-85723", "Consider Phlebas", a.id.unwrap_or_default()))
        .await?;
    let editions = db.registry().get("editions").cloned().unwrap();
    let mut row = permanent::Row::new();
    row.insert("book_id".into(), b.id.into());
    db.backend().insert(&editions, &row).await?;

    let err = a.delete(&db, false).await.unwrap_err();
    let err = err.downcast_ref::<ProtectedError>().unwrap();
    assert_eq!(err.table, "books");
    assert_eq!(err.referenced_by, "editions");
    assert_eq!(Book::objects(&db).count().await?, 1);
    assert_eq!(Author::objects(&db).count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_limited_delete_writes_nothing() -> Result<()> {
    let (db, backend) = setup().await?;
    let writes = backend.writes();
    let err = Book::all_objects(&db)
        .filter(cond!(author_id = 1))
        .limit(1)
        .delete()
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<PreconditionError>(),
        Some(&PreconditionError::LimitedDelete)
    );
    assert_eq!(backend.writes(), writes);
    assert_eq!(Book::objects(&db).count().await?, 3);

    let err = Book::objects(&db)
        .all()
        .offset(1)
        .delete()
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<PreconditionError>(),
        Some(&PreconditionError::LimitedDelete)
    );
    assert_eq!(backend.writes(), writes);

    let unsaved = book("x", "x", 1);
    let err = unsaved.delete(&db, false).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PreconditionError>(),
        Some(PreconditionError::MissingPrimaryKey { .. })
    ));
    assert_eq!(backend.writes(), writes);
    Ok(())
}

#[tokio::test]
async fn test_get_restore_or_create() -> Result<()> {
    let (db, _) = setup().await?;
    let counter = counter(&db).await;
    let dune = Book::objects(&db).get(cond!(isbn = "0-441")).await?;
    Book::objects(&db)
        .filter(cond!(isbn = "0-441"))
        .delete()
        .await?;

    let (restored, created) = Book::objects(&db)
        .get_restore_or_create(&[("isbn", "0-441".into())], &[])
        .await?;
    assert!(!created);
    assert_eq!(restored, dune);
    assert_eq!(counter.pairs(), (1, 1));
    assert_eq!(Book::all_objects(&db).count().await?, 3);

    let (created_book, created) = Book::objects(&db)
        .get_restore_or_create(
            &[("isbn", "0-15".into())],
            &[("title", "Hyperion".into()), ("author_id", 2.into())],
        )
        .await?;
    assert!(created);
    assert_eq!(created_book.title, "Hyperion");
    assert_eq!(created_book.removed, None);
    assert_eq!(Book::all_objects(&db).count().await?, 4);
    Ok(())
}

#[tokio::test]
async fn test_restore_on_create() -> Result<()> {
    let (db, _) = setup().await?;
    let counter = counter(&db).await;
    Book::objects(&db)
        .filter(cond!(title LIKE "dune%"))
        .delete()
        .await?;
    assert_eq!(Book::objects(&db).count().await?, 1);

    let messiah = Book::objects(&db)
        .create(&book("0-442", "Dune Messiah", 1))
        .await?;
    assert_eq!(messiah.id, Some(2));
    assert_eq!(Book::objects(&db).count().await?, 2);
    assert_eq!(Book::all_objects(&db).count().await?, 3);
    assert_eq!(counter.pairs(), (1, 1));
    Ok(())
}

#[tokio::test]
async fn test_bulk_restore() -> Result<()> {
    let (db, _) = setup().await?;
    let counter = counter(&db).await;
    Author::objects(&db).all().delete().await?;
    assert_eq!(Book::objects(&db).count().await?, 0);

    let rows = Book::deleted_objects(&db)
        .filter(cond!(author_id = 1))
        .restore()
        .await?;
    assert_eq!(rows, 2);
    assert_eq!(Book::objects(&db).count().await?, 2);
    assert_eq!(Book::objects(&db).restore().await?, 3);
    assert_eq!(counter.pairs(), (0, 0));
    Ok(())
}

#[tokio::test]
async fn test_flag_marker() -> Result<()> {
    init();
    let db = Database::new(MemoryBackend::new()).with_registry(registry());
    for body in ["a", "b"] {
        Memo::objects(&db)
            .create(&Memo {
                id: None,
                body: body.into(),
                deleted: false,
            })
            .await?;
    }
    Memo::objects(&db).filter(cond!(body = "a")).delete().await?;
    let a = Memo::deleted_objects(&db).get(cond!(body = "a")).await?;
    assert!(a.deleted);
    assert_eq!(Memo::objects(&db).count().await?, 1);

    let (total, counts) = Memo::all_objects(&db).all().force_delete().await?;
    assert_eq!(total, 2);
    assert_eq!(counts.get("Memo"), Some(&2));
    assert_eq!(Memo::all_objects(&db).count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_unix_time_marker() -> Result<()> {
    init();
    let db = Database::new(MemoryBackend::new()).with_registry(registry());
    let meta = Badge::meta();
    assert_eq!(meta.marker.as_ref().map(|m| m.kind), Some(SoftDelete::UnixTime));
    assert_eq!(meta.column_meta("deleted_at").map(|c| c.ty), Some(ColumnType::Int));

    let gold = Badge::objects(&db).create(&badge("gold")).await?;
    Badge::objects(&db).create(&badge("silver")).await?;
    gold.delete(&db, false).await?;
    let mut deleted = Badge::deleted_objects(&db).get(cond!(code = "gold")).await?;
    assert!(deleted.deleted_at >= 1);
    assert!(deleted.is_deleted());
    assert_eq!(Badge::objects(&db).count().await?, 1);

    assert!(deleted.restore(&db).await?);
    assert_eq!(deleted.deleted_at, 0);
    assert_eq!(Badge::objects(&db).get(cond!(code = "gold")).await?, gold);
    assert_eq!(Badge::deleted_objects(&db).count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_exclude() -> Result<()> {
    let (db, _) = setup().await?;
    assert_eq!(Book::objects(&db).exclude(cond!(author_id = 1)).count().await?, 1);
    Book::objects(&db).filter(cond!(title = "Dune")).delete().await?;
    assert_eq!(
        Book::objects(&db)
            .exclude(cond!(title LIKE "The%"))
            .count()
            .await?,
        1
    );
    assert_eq!(
        Book::deleted_objects(&db)
            .exclude(cond!(title = "Dune"))
            .count()
            .await?,
        0
    );
    Ok(())
}

trait BookQuerySet {
    fn by(&self, author_id: i64) -> Self;
    fn titled(&self, prefix: &str) -> Self;
}

impl BookQuerySet for QuerySet<Book> {
    fn by(&self, author_id: i64) -> Self {
        self.filter(cond!(author_id = author_id))
    }

    fn titled(&self, prefix: &str) -> Self {
        self.filter(cond!(title LIKE format!("{}%", prefix)))
    }
}

#[tokio::test]
async fn test_custom_queryset() -> Result<()> {
    let (db, _) = setup().await?;
    Book::objects(&db).all().by(1).titled("Dune M").delete().await?;
    assert_eq!(Book::objects(&db).all().by(1).count().await?, 1);
    assert_eq!(Book::deleted_objects(&db).all().titled("Dune").count().await?, 1);

    let qs = Book::deleted_objects(&db).all().by(1);
    assert_eq!(qs.view(), ViewKind::Deleted);
    let unpatched = qs.unpatched().titled("Dune");
    assert!(unpatched.is_unpatched());
    assert_eq!(unpatched.count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_explicit_registry() -> Result<()> {
    init();
    // without the book registration nothing cascades
    let registry = Registry::new().register::<Author>();
    let db = Database::new(MemoryBackend::new()).with_registry(registry);
    let a = Author::objects(&db).create(&author("Banks")).await?;
    Book::objects(&db)
        .create(&book("1-85723", "Consider Phlebas", a.id.unwrap_or_default()))
        .await?;
    a.delete(&db, false).await?;
    assert_eq!(Book::objects(&db).count().await?, 1);
    Ok(())
}
