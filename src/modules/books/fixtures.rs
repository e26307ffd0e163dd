//! Seed data loading for demo and test environments.

use std::path::Path;

use anyhow::Context;
use bookstore_db::{Document, DocumentStore, Filter};

use super::models::{BOOKS_COLLECTION, ORDER_COLLECTION};

/// Empties `collection`, creating it if needed, then inserts the documents of
/// `<seed_dir>/<collection>.json` when that file exists.
///
/// Returns the number of documents inserted.
pub fn reset_collection(
    store: &DocumentStore,
    collection: &str,
    seed_dir: &Path,
) -> anyhow::Result<usize> {
    let target = store.collection(collection);
    if store.collection_exists(collection) {
        target
            .delete_many(&Filter::new())
            .with_context(|| format!("failed to empty collection '{collection}'"))?;
    } else {
        store.create_collection(collection);
    }

    let path = seed_dir.join(format!("{collection}.json"));
    if !path.exists() {
        tracing::debug!(collection, path = %path.display(), "no seed file");
        return Ok(0);
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let documents: Vec<Document> = serde_json::from_str(&raw)
        .with_context(|| format!("seed file {} is not a JSON array of objects", path.display()))?;

    let count = documents.len();
    for document in documents {
        target
            .insert_one(document)
            .with_context(|| format!("failed to seed collection '{collection}'"))?;
    }
    Ok(count)
}

/// Resets the catalogue and the orders.
pub fn reset_test_data(store: &DocumentStore, seed_dir: &Path) -> anyhow::Result<()> {
    for collection in [BOOKS_COLLECTION, ORDER_COLLECTION] {
        let seeded = reset_collection(store, collection, seed_dir)?;
        tracing::info!(collection, seeded, "reset collection");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::models::Book;
    use serde_json::json;
    use std::path::PathBuf;

    fn repo_data_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("data")
    }

    #[test]
    fn seeds_books_from_the_repository_data() {
        let store = DocumentStore::new();
        reset_test_data(&store, &repo_data_dir()).unwrap();

        let books = store.collection(BOOKS_COLLECTION).find(&Filter::new()).unwrap();
        assert!(!books.is_empty());
        for document in books {
            Book::from_document(document).unwrap();
        }
        assert!(store.collection_exists(ORDER_COLLECTION));
        assert!(store
            .collection(ORDER_COLLECTION)
            .find(&Filter::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn reset_discards_previous_documents() {
        let store = DocumentStore::new();
        let stray = json!({"_id": "stray", "by": "nobody"}).as_object().cloned().unwrap();
        store.collection(ORDER_COLLECTION).insert_one(stray).unwrap();

        let seeded = reset_collection(&store, ORDER_COLLECTION, Path::new("/nonexistent")).unwrap();
        assert_eq!(seeded, 0);
        assert!(store
            .collection(ORDER_COLLECTION)
            .find(&Filter::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn missing_collection_is_created_even_without_a_seed_file() {
        let store = DocumentStore::new();
        reset_collection(&store, "audit", Path::new("/nonexistent")).unwrap();
        assert!(store.collection_exists("audit"));
    }
}
