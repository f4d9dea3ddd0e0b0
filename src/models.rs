use crate::error::BookError;
use crate::schema::books;
use crate::validator::{BookFields, BookValidator};

#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    diesel::Queryable,
    diesel::Selectable,
)]
#[diesel(table_name = books)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Book {
    /// Compares every field except `id`.
    pub fn eq_ignoring_id(&self, other: &Book) -> bool {
        self.title == other.title
            && self.author == other.author
            && self.year == other.year
            && self.description == other.description
    }
}

/// The stored columns of a [`Book`]; the id is assigned by the database.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    diesel::Insertable,
    diesel::AsChangeset,
)]
#[diesel(table_name = books)]
#[diesel(treat_none_as_null = true)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewBook {
    pub fn into_book(self, id: i32) -> Book {
        Book {
            id,
            title: self.title,
            author: self.author,
            year: self.year,
            description: self.description,
        }
    }
}

impl BookFields for NewBook {
    fn title(&self) -> Option<&str> {
        Some(&self.title)
    }

    fn author(&self) -> Option<&str> {
        Some(&self.author)
    }

    fn year(&self) -> Option<i32> {
        Some(self.year)
    }
}

/// Request body for writes. Every field is optional so that missing fields
/// surface as validation errors instead of JSON decoding failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct BookPayload {
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
}

impl BookPayload {
    pub fn into_new_book(self, validator: &BookValidator) -> Result<NewBook, BookError> {
        validator.ensure_valid(&self)?;

        Ok(NewBook {
            title: self.title.unwrap_or_default(),
            author: self.author.unwrap_or_default(),
            year: self.year.unwrap_or_default(),
            description: self.description,
        })
    }
}

impl BookFields for BookPayload {
    fn id(&self) -> Option<i32> {
        self.id
    }

    fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    fn year(&self) -> Option<i32> {
        self.year
    }
}
