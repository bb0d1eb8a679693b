//! Bookstore document shapes
//!
//! The collection schema is owned by the database; these types only describe
//! what the seed data writes and what the aggregation steps read back.

use crate::database::types::DatabaseError;
use mongodb::bson::{self, Bson, Document};
use serde::{Deserialize, Serialize};

/// Book document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub genre: String,
    pub published_year: i32,
    pub price: f64,
    pub in_stock: bool,
}

impl Book {
    pub fn new(
        title: &str,
        author: &str,
        genre: &str,
        published_year: i32,
        price: f64,
        in_stock: bool,
    ) -> Self {
        Self {
            title: title.to_string(),
            author: author.to_string(),
            genre: genre.to_string(),
            published_year,
            price,
            in_stock,
        }
    }

    /// Convert to a BSON document for insertion
    pub fn to_document(&self) -> Result<Document, DatabaseError> {
        Ok(bson::to_document(self)?)
    }
}

/// Row produced by the average-price-by-genre aggregation
///
/// Values are kept as the server returned them: a genre may be any BSON
/// value and `$avg` over Decimal128 prices yields a Decimal128.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenreAveragePrice {
    #[serde(rename = "_id")]
    pub genre: Bson,
    #[serde(rename = "avgPrice")]
    pub avg_price: Bson,
}

impl GenreAveragePrice {
    /// Genre when it is stored as a string
    pub fn genre_name(&self) -> Option<&str> {
        self.genre.as_str()
    }

    /// Average when it is a double or an integer
    pub fn average(&self) -> Option<f64> {
        number_as_f64(&self.avg_price)
    }
}

impl From<Document> for GenreAveragePrice {
    fn from(mut row: Document) -> Self {
        Self {
            genre: row.remove("_id").unwrap_or(Bson::Null),
            avg_price: row.remove("avgPrice").unwrap_or(Bson::Null),
        }
    }
}

/// Row produced by the top-author aggregation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorBookCount {
    #[serde(rename = "_id")]
    pub author: Bson,
    pub count: Bson,
}

impl AuthorBookCount {
    pub fn author_name(&self) -> Option<&str> {
        self.author.as_str()
    }

    pub fn book_count(&self) -> Option<i64> {
        match self.count {
            Bson::Int32(n) => Some(i64::from(n)),
            Bson::Int64(n) => Some(n),
            _ => None,
        }
    }
}

impl From<Document> for AuthorBookCount {
    fn from(mut row: Document) -> Self {
        Self {
            author: row.remove("_id").unwrap_or(Bson::Null),
            count: row.remove("count").unwrap_or(Bson::Null),
        }
    }
}

fn number_as_f64(value: &Bson) -> Option<f64> {
    match *value {
        Bson::Double(n) => Some(n),
        Bson::Int32(n) => Some(f64::from(n)),
        Bson::Int64(n) => Some(n as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, Decimal128};

    #[test]
    fn test_book_to_document() {
        let book = Book::new("Emma", "Jane Austen", "Romance", 1815, 8.99, true);
        let document = book.to_document().unwrap();

        assert_eq!(document.get_str("title").unwrap(), "Emma");
        assert_eq!(document.get_i32("published_year").unwrap(), 1815);
        assert_eq!(document.get_f64("price").unwrap(), 8.99);
        assert!(document.get_bool("in_stock").unwrap());
        assert!(!document.contains_key("_id"));
    }

    #[test]
    fn test_aggregate_rows_from_documents() {
        let fiction = GenreAveragePrice::from(doc! { "_id": "Fiction", "avgPrice": 15.0 });
        assert_eq!(fiction.genre_name(), Some("Fiction"));
        assert_eq!(fiction.average(), Some(15.0));

        let missing = GenreAveragePrice::from(doc! { "_id": null, "avgPrice": null });
        assert_eq!(missing.genre, Bson::Null);
        assert_eq!(missing.average(), None);

        let orwell = AuthorBookCount::from(doc! { "_id": "George Orwell", "count": 3 });
        assert_eq!(orwell.author_name(), Some("George Orwell"));
        assert_eq!(orwell.book_count(), Some(3));
    }

    #[test]
    fn test_aggregate_rows_keep_unexpected_types() {
        let price = Decimal128::from_bytes([0u8; 16]);
        let row = GenreAveragePrice::from(doc! {
            "_id": ["Fiction", "Classic"],
            "avgPrice": price,
        });
        assert_eq!(row.genre_name(), None);
        assert!(matches!(row.genre, Bson::Array(ref genres) if genres.len() == 2));
        assert!(matches!(row.avg_price, Bson::Decimal128(_)));
        assert_eq!(row.average(), None);
    }
}
