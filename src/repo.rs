use crate::error::BookError;
use crate::models::{Book, NewBook};
use crate::validator::FieldError;
use std::future::Future;

pub trait BookRepo {
    fn save_book(&self, new_book: NewBook) -> impl Future<Output = Result<Book, BookError>> + Send;

    fn get_book(&self, id: i32) -> impl Future<Output = Result<Book, BookError>> + Send;

    fn get_all_books(&self) -> impl Future<Output = Result<Vec<Book>, BookError>> + Send;

    fn search_by_author(
        &self,
        author: &str,
    ) -> impl Future<Output = Result<Vec<Book>, BookError>> + Send;

    fn search_by_title(
        &self,
        title: &str,
    ) -> impl Future<Output = Result<Vec<Book>, BookError>> + Send;

    fn update_book(
        &self,
        id: i32,
        new_book: NewBook,
    ) -> impl Future<Output = Result<Book, BookError>> + Send;

    /// Returns the number of deleted rows, which is always 1 on success
    fn delete_book(&self, id: i32) -> impl Future<Output = Result<usize, BookError>> + Send;

    /// Deletes every book and restarts id generation from 1
    fn delete_all_books(&self) -> impl Future<Output = Result<usize, BookError>> + Send;
}

/// Ids below 1 never address a stored book.
pub fn ensure_serial(id: i32) -> Result<i32, BookError> {
    if id < 1 {
        Err(BookError::InvalidSerial)
    } else {
        Ok(id)
    }
}

/// Search terms must be non-empty; `field` names the searched column in the error.
pub fn ensure_search_term<'a>(field: &str, term: &'a str) -> Result<&'a str, BookError> {
    if term.is_empty() {
        Err(BookError::Validation(vec![FieldError::empty(field)]))
    } else {
        Ok(term)
    }
}
