//! Field-level validation shared by the HTTP handlers and the repository.

use chrono::Datelike;

use crate::error::BookError;

/// Oldest year a book may carry.
pub const MIN_YEAR: i32 = -868;

pub const FIELD_ID: &str = "ID";
pub const FIELD_TITLE: &str = "Title";
pub const FIELD_AUTHOR: &str = "Author";
pub const FIELD_YEAR: &str = "Year";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldError {
    pub field: String,
    pub msg: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, msg: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            msg: msg.into(),
        }
    }

    pub fn empty(field: &str) -> Self {
        FieldError::new(field, format!("{field} cannot be empty"))
    }

    pub fn year_out_of_range(current_year: i32) -> Self {
        FieldError::new(
            FIELD_YEAR,
            format!("Year should be between {MIN_YEAR} and {current_year}"),
        )
    }

    pub fn invalid_id() -> Self {
        FieldError::new(FIELD_ID, format!("{FIELD_ID} should be positive non-null number"))
    }
}

/// Read access to the validated fields of anything book-shaped.
pub trait BookFields {
    fn id(&self) -> Option<i32> {
        None
    }

    fn title(&self) -> Option<&str>;

    fn author(&self) -> Option<&str>;

    fn year(&self) -> Option<i32>;
}

/// A single rule; the second argument is the current calendar year.
pub type Rule = fn(&dyn BookFields, i32) -> Option<FieldError>;

/// Explicit table of validation rules, built once at startup and handed to
/// whoever needs to check a book.
#[derive(Clone)]
pub struct BookValidator {
    rules: Vec<Rule>,
    clock: fn() -> i32,
}

impl BookValidator {
    pub fn new() -> Self {
        BookValidator::with_clock(current_year)
    }

    /// Builds the default rule table with a custom source for the current year.
    pub fn with_clock(clock: fn() -> i32) -> Self {
        BookValidator {
            rules: vec![title_required, author_required, year_in_range, id_positive],
            clock,
        }
    }

    pub fn validate(&self, book: &dyn BookFields) -> Vec<FieldError> {
        let year = (self.clock)();
        self.rules
            .iter()
            .filter_map(|rule| rule(book, year))
            .collect()
    }

    pub fn ensure_valid(&self, book: &dyn BookFields) -> Result<(), BookError> {
        let fields = self.validate(book);
        if fields.is_empty() {
            Ok(())
        } else {
            Err(BookError::Validation(fields))
        }
    }
}

impl Default for BookValidator {
    fn default() -> Self {
        BookValidator::new()
    }
}

fn current_year() -> i32 {
    chrono::Local::now().year()
}

fn non_empty(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

fn title_required(book: &dyn BookFields, _: i32) -> Option<FieldError> {
    (!non_empty(book.title())).then(|| FieldError::empty(FIELD_TITLE))
}

fn author_required(book: &dyn BookFields, _: i32) -> Option<FieldError> {
    (!non_empty(book.author())).then(|| FieldError::empty(FIELD_AUTHOR))
}

fn year_in_range(book: &dyn BookFields, current_year: i32) -> Option<FieldError> {
    match book.year() {
        None => Some(FieldError::empty(FIELD_YEAR)),
        Some(year) if (MIN_YEAR..=current_year).contains(&year) => None,
        Some(_) => Some(FieldError::year_out_of_range(current_year)),
    }
}

fn id_positive(book: &dyn BookFields, _: i32) -> Option<FieldError> {
    match book.id() {
        Some(id) if id < 1 => Some(FieldError::invalid_id()),
        _ => None,
    }
}
