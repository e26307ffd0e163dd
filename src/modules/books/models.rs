use bookstore_db::{Document, ID_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

/// Collection holding the catalogue.
pub const BOOKS_COLLECTION: &str = "books";
/// Collection holding standalone orders.
pub const ORDER_COLLECTION: &str = "order";
/// Stored name of the stock counter.
pub const STOCK_FIELD: &str = "available";
/// Array on a book document that the atomic strategy appends orders to.
pub const CHECKOUT_FIELD: &str = "checkout";

/// A catalogue entry as served over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub publish_date: Option<String>,
    pub pages: u32,
    pub language: Option<String>,
    pub publisher_id: Option<String>,
    /// Copies left; never negative.
    pub stock: u32,
}

/// Storage layout of a book document.
#[derive(Debug, Deserialize)]
struct StoredBook {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "author", default)]
    authors: Vec<String>,
    #[serde(rename = "published_date", default)]
    publish_date: Option<String>,
    #[serde(default)]
    pages: u32,
    #[serde(default)]
    language: Option<String>,
    #[serde(rename = "publisher_id", default)]
    publisher_id: Option<String>,
    #[serde(rename = "available", default)]
    stock: u32,
}

impl Book {
    /// Decodes a stored book document.
    pub fn from_document(document: Document) -> Result<Self, serde_json::Error> {
        let stored: StoredBook = serde_json::from_value(Value::Object(document))?;
        Ok(Self {
            id: stored.id,
            title: stored.title,
            authors: stored.authors,
            publish_date: stored.publish_date,
            pages: stored.pages,
            language: stored.language,
            publisher_id: stored.publisher_id,
            stock: stored.stock,
        })
    }

    /// Encodes the book in its storage layout.
    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        document.insert(ID_FIELD.to_string(), json!(self.id));
        document.insert("title".to_string(), json!(self.title));
        document.insert("author".to_string(), json!(self.authors));
        if let Some(date) = &self.publish_date {
            document.insert("published_date".to_string(), json!(date));
        }
        document.insert("pages".to_string(), json!(self.pages));
        if let Some(language) = &self.language {
            document.insert("language".to_string(), json!(language));
        }
        if let Some(publisher) = &self.publisher_id {
            document.insert("publisher_id".to_string(), json!(publisher));
        }
        document.insert(STOCK_FIELD.to_string(), json!(self.stock));
        document
    }
}

/// Who places an order, identified by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub email: String,
}

impl Customer {
    /// Resolves a known alias; anything else is taken as the email itself.
    pub fn of(alias: &str) -> Self {
        match alias {
            "christoph" => Self::christoph(),
            "jeff" => Self::jeff(),
            "oliver" => Self::oliver(),
            other => Self::new(other),
        }
    }

    /// Like [`Customer::of`], with a missing or blank alias meaning the guest.
    pub fn resolve(alias: Option<&str>) -> Self {
        match alias.map(str::trim) {
            Some(alias) if !alias.is_empty() => Self::of(alias),
            _ => Self::guest(),
        }
    }

    pub fn christoph() -> Self {
        Self::new("cstrobl@pivotal.io")
    }

    pub fn jeff() -> Self {
        Self::new("jeff.yemin@mongodb.com")
    }

    pub fn oliver() -> Self {
        Self::new("ogierke@pivotal.io")
    }

    pub fn guest() -> Self {
        Self::new("guest@fantasy-bookstore.io")
    }

    fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }
}

/// A completed purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: String,
    pub customer: String,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub books: Vec<Book>,
}

impl Order {
    /// A new order of `book` for `customer`, dated now.
    pub fn new(customer: &Customer, book: &Book) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            customer: customer.email.clone(),
            date: OffsetDateTime::now_utc(),
            books: vec![book.clone()],
        }
    }

    /// Standalone order document: books are stored as references.
    pub fn to_document(&self) -> Document {
        let books: Vec<Value> = self
            .books
            .iter()
            .map(|book| json!({ "$ref": BOOKS_COLLECTION, "$id": book.id }))
            .collect();
        let mut document = self.checkout_entry();
        document.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        document.insert("books".to_string(), Value::Array(books));
        document
    }

    /// Entry embedded in the book document by the atomic strategy.
    pub fn checkout_entry(&self) -> Document {
        let mut document = Document::new();
        document.insert("by".to_string(), Value::String(self.customer.clone()));
        document.insert("date".to_string(), json!({ "$date": self.millis() }));
        document
    }

    fn millis(&self) -> i64 {
        (self.date.unix_timestamp_nanos() / 1_000_000) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dune() -> Book {
        Book {
            id: "b1".to_string(),
            title: "Dune".to_string(),
            authors: vec!["Frank Herbert".to_string()],
            publish_date: Some("1965-08-01".to_string()),
            pages: 412,
            language: Some("English".to_string()),
            publisher_id: Some("chilton".to_string()),
            stock: 3,
        }
    }

    #[test]
    fn book_documents_use_the_stored_field_names() {
        let document = dune().to_document();
        assert_eq!(document["_id"], "b1");
        assert_eq!(document["author"], json!(["Frank Herbert"]));
        assert_eq!(document["published_date"], "1965-08-01");
        assert_eq!(document["publisher_id"], "chilton");
        assert_eq!(document["available"], 3);
        assert!(document.get("stock").is_none());

        assert_eq!(Book::from_document(document).unwrap(), dune());
    }

    #[test]
    fn sparse_book_documents_decode_with_defaults() {
        let document = json!({"_id": "b9", "available": 1})
            .as_object()
            .cloned()
            .unwrap();
        let book = Book::from_document(document).unwrap();
        assert_eq!(book.stock, 1);
        assert!(book.authors.is_empty());
        assert_eq!(book.publish_date, None);
    }

    #[test]
    fn negative_stock_is_rejected() {
        let document = json!({"_id": "b9", "available": -1})
            .as_object()
            .cloned()
            .unwrap();
        assert!(Book::from_document(document).is_err());
    }

    #[test]
    fn book_serializes_in_camel_case() {
        let value = serde_json::to_value(dune()).unwrap();
        assert_eq!(value["publishDate"], "1965-08-01");
        assert_eq!(value["publisherId"], "chilton");
        assert_eq!(value["stock"], 3);
    }

    #[test]
    fn customer_aliases() {
        assert_eq!(Customer::of("christoph").email, "cstrobl@pivotal.io");
        assert_eq!(Customer::of("jeff").email, "jeff.yemin@mongodb.com");
        assert_eq!(Customer::of("oliver").email, "ogierke@pivotal.io");
        assert_eq!(Customer::of("unknown-person").email, "unknown-person");
        assert_eq!(Customer::resolve(None), Customer::guest());
        assert_eq!(Customer::resolve(Some("  ")), Customer::guest());
        assert_eq!(Customer::resolve(Some("jeff")), Customer::jeff());
    }

    #[test]
    fn order_document_references_books() {
        let order = Order::new(&Customer::jeff(), &dune());
        let document = order.to_document();
        assert_eq!(document["_id"], json!(order.id));
        assert_eq!(document["by"], "jeff.yemin@mongodb.com");
        assert_eq!(document["books"], json!([{"$ref": "books", "$id": "b1"}]));
        assert!(document["date"]["$date"].as_i64().unwrap() > 0);

        let entry = order.checkout_entry();
        assert!(entry.get("books").is_none());
        assert!(entry.get("_id").is_none());
    }

    #[test]
    fn order_serializes_date_as_rfc3339() {
        let order = Order::new(&Customer::guest(), &dune());
        let value = serde_json::to_value(&order).unwrap();
        let date = value["date"].as_str().unwrap();
        assert!(OffsetDateTime::parse(date, &time::format_description::well_known::Rfc3339).is_ok());
        assert_eq!(value["books"][0]["id"], "b1");
    }
}
