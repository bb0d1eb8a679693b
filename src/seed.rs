//! Sample bookstore dataset
//!
//! Gives the default query plan something to find on a fresh database.

use crate::database::{DatabaseError, DocumentCollection, InsertOutcome};
use crate::models::Book;
use mongodb::bson::{doc, Document};
use tracing::info;

/// Twelve classic books covering every default step parameter
pub fn sample_books() -> Vec<Book> {
    vec![
        Book::new("To Kill a Mockingbird", "Harper Lee", "Fiction", 1960, 12.99, true),
        Book::new("1984", "George Orwell", "Dystopian", 1949, 10.99, true),
        Book::new("The Great Gatsby", "F. Scott Fitzgerald", "Fiction", 1925, 9.99, true),
        Book::new("Brave New World", "Aldous Huxley", "Dystopian", 1932, 11.50, false),
        Book::new("The Hobbit", "J.R.R. Tolkien", "Fantasy", 1937, 14.99, true),
        Book::new("The Catcher in the Rye", "J.D. Salinger", "Fiction", 1951, 8.99, true),
        Book::new("Pride and Prejudice", "Jane Austen", "Romance", 1813, 7.99, true),
        Book::new("The Lord of the Rings", "J.R.R. Tolkien", "Fantasy", 1954, 19.99, true),
        Book::new("Animal Farm", "George Orwell", "Political Satire", 1945, 8.50, false),
        Book::new("The Alchemist", "Paulo Coelho", "Fiction", 1988, 10.99, true),
        Book::new("Moby Dick", "Herman Melville", "Adventure", 1851, 12.50, false),
        Book::new("The Midnight Library", "Matt Haig", "Fiction", 2020, 13.99, true),
    ]
}

/// Insert `books`, optionally clearing the collection first
pub async fn seed_collection(
    collection: &dyn DocumentCollection,
    books: &[Book],
    reset: bool,
) -> Result<InsertOutcome, DatabaseError> {
    if reset {
        let removed = collection.delete_many(doc! {}).await?;
        info!(removed = removed.deleted_count, "cleared existing books");
    }

    let documents = books
        .iter()
        .map(Book::to_document)
        .collect::<Result<Vec<Document>, _>>()?;

    let outcome = collection.insert_many(documents).await?;
    info!(
        inserted = outcome.inserted_count,
        namespace = %collection.namespace(),
        "seeded books"
    );
    Ok(outcome)
}
