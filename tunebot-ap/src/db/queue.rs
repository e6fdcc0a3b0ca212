//! Session queue queries
//!
//! Each session owns an independent FIFO over the shared `session_queue`
//! table, ordered by the autoincrement row id.

use crate::error::StorageError;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use tunebot_common::db::QueueEntry;

type Result<T> = std::result::Result<T, StorageError>;

fn from_row(row: &SqliteRow) -> QueueEntry {
    QueueEntry {
        id: row.get("id"),
        session_id: row.get("session_id"),
        url: row.get("url"),
        title: row.get("title"),
    }
}

/// Append an entry to the tail of a session queue
///
/// Returns the stored entry and its 1-based position in that queue.
pub async fn enqueue(
    db: &Pool<Sqlite>,
    session_id: &str,
    url: &str,
    title: &str,
) -> Result<(QueueEntry, usize)> {
    let mut tx = db.begin().await?;

    let row = sqlx::query(
        r#"
        INSERT INTO session_queue (session_id, url, title)
        VALUES (?, ?, ?)
        RETURNING id, session_id, url, title
        "#,
    )
    .bind(session_id)
    .bind(url)
    .bind(title)
    .fetch_one(&mut *tx)
    .await?;
    let entry = from_row(&row);

    let position: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM session_queue WHERE session_id = ? AND id <= ?")
            .bind(session_id)
            .bind(entry.id)
            .fetch_one(&mut *tx)
            .await?;

    tx.commit().await?;

    Ok((entry, position as usize))
}

/// Pop the earliest entry of a session queue
///
/// A single statement, so two concurrent callers never receive the same
/// entry. Returns `None` (and changes nothing) on an empty queue.
pub async fn dequeue_front(db: &Pool<Sqlite>, session_id: &str) -> Result<Option<QueueEntry>> {
    let row = sqlx::query(
        r#"
        DELETE FROM session_queue
        WHERE id = (SELECT MIN(id) FROM session_queue WHERE session_id = ?)
        RETURNING id, session_id, url, title
        "#,
    )
    .bind(session_id)
    .fetch_optional(db)
    .await?;

    Ok(row.as_ref().map(from_row))
}

/// Earliest entry of a session queue, left in place
pub async fn front(db: &Pool<Sqlite>, session_id: &str) -> Result<Option<QueueEntry>> {
    let row = sqlx::query(
        "SELECT id, session_id, url, title FROM session_queue WHERE session_id = ? ORDER BY id ASC LIMIT 1",
    )
    .bind(session_id)
    .fetch_optional(db)
    .await?;

    Ok(row.as_ref().map(from_row))
}

/// Delete one entry by id; false if it was already gone
pub async fn remove(db: &Pool<Sqlite>, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM session_queue WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Replace the display title of a pending entry
pub async fn set_title(db: &Pool<Sqlite>, id: i64, title: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE session_queue SET title = ? WHERE id = ?")
        .bind(title)
        .bind(id)
        .execute(db)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Remove every entry of a session queue, returning how many were removed
pub async fn clear(db: &Pool<Sqlite>, session_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM session_queue WHERE session_id = ?")
        .bind(session_id)
        .execute(db)
        .await?;

    Ok(result.rows_affected())
}

/// Ordered view of a session queue
pub async fn snapshot(db: &Pool<Sqlite>, session_id: &str) -> Result<Vec<QueueEntry>> {
    let rows = sqlx::query(
        "SELECT id, session_id, url, title FROM session_queue WHERE session_id = ? ORDER BY id ASC",
    )
    .bind(session_id)
    .fetch_all(db)
    .await?;

    Ok(rows.iter().map(from_row).collect())
}

/// Number of pending entries in a session queue
pub async fn len(db: &Pool<Sqlite>, session_id: &str) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM session_queue WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(db)
        .await?;

    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        tunebot_common::db::create_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_snapshot_preserves_enqueue_order() {
        let pool = setup_test_db().await;

        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let (entry, position) = enqueue(&pool, "guild", name, name).await.unwrap();
            assert_eq!(position, i + 1);
            assert_eq!(entry.url, *name);
        }

        let urls: Vec<String> = snapshot(&pool, "guild")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.url)
            .collect();
        assert_eq!(urls, vec!["a", "b", "c"]);
        assert_eq!(len(&pool, "guild").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let pool = setup_test_db().await;

        enqueue(&pool, "one", "a", "A").await.unwrap();
        enqueue(&pool, "two", "b", "B").await.unwrap();
        let (_, position) = enqueue(&pool, "one", "c", "C").await.unwrap();
        assert_eq!(position, 2);

        let front = dequeue_front(&pool, "two").await.unwrap().unwrap();
        assert_eq!(front.url, "b");
        assert_eq!(len(&pool, "one").await.unwrap(), 2);

        assert_eq!(clear(&pool, "one").await.unwrap(), 2);
        assert!(snapshot(&pool, "one").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_empty_is_noop() {
        let pool = setup_test_db().await;
        enqueue(&pool, "other", "x", "X").await.unwrap();

        assert!(dequeue_front(&pool, "guild").await.unwrap().is_none());
        assert_eq!(len(&pool, "other").await.unwrap(), 1);
        assert_eq!(clear(&pool, "guild").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_front_leaves_entry_until_removed() {
        let pool = setup_test_db().await;
        let (first, _) = enqueue(&pool, "g", "first", "first").await.unwrap();
        enqueue(&pool, "g", "second", "second").await.unwrap();

        let peeked = front(&pool, "g").await.unwrap().unwrap();
        assert_eq!(peeked, first);
        assert_eq!(len(&pool, "g").await.unwrap(), 2);

        assert!(set_title(&pool, peeked.id, "First Song").await.unwrap());
        assert_eq!(front(&pool, "g").await.unwrap().unwrap().title, "First Song");

        assert!(remove(&pool, peeked.id).await.unwrap());
        assert!(!remove(&pool, peeked.id).await.unwrap());
        assert_eq!(front(&pool, "g").await.unwrap().unwrap().url, "second");
        assert!(front(&pool, "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo() {
        let pool = setup_test_db().await;
        enqueue(&pool, "g", "first", "1").await.unwrap();
        enqueue(&pool, "g", "second", "2").await.unwrap();

        assert_eq!(dequeue_front(&pool, "g").await.unwrap().unwrap().url, "first");
        enqueue(&pool, "g", "third", "3").await.unwrap();
        assert_eq!(dequeue_front(&pool, "g").await.unwrap().unwrap().url, "second");
        assert_eq!(dequeue_front(&pool, "g").await.unwrap().unwrap().url, "third");
        assert!(dequeue_front(&pool, "g").await.unwrap().is_none());
    }
}
