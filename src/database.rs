use std::pin::pin;

use anyhow::{anyhow, Context};
use bb8::Pool;
use diesel::result::DatabaseErrorKind;
use diesel::{
    Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, QueryResult,
    SelectableHelper,
};
use diesel_async::{
    pooled_connection::{AsyncDieselConnectionManager, PoolError},
    AsyncPgConnection, RunQueryDsl,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use futures_util::{Stream, StreamExt};
use tracing::{info, warn};

use crate::error::BookError;
use crate::models::{Book, NewBook};
use crate::repo::{ensure_search_term, ensure_serial, BookRepo};
use crate::schema::books;
use crate::settings::DatabaseSettings;
use crate::validator::{BookValidator, FIELD_AUTHOR, FIELD_TITLE};

pub type DBPool = bb8::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

pub async fn create_db_pool(settings: &DatabaseSettings) -> anyhow::Result<DBPool> {
    let config = AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new(
        settings.connection_string(),
    );

    info!(
        host = %settings.host,
        dbname = %settings.dbname,
        max_open = settings.max_open_connections,
        max_idle = settings.max_idle_connections,
        idle_timeout = ?settings.max_conn_idle_time(),
        "Creating DB connection pool"
    );

    Pool::builder()
        .max_size(settings.max_open_connections)
        .min_idle(Some(
            settings
                .max_idle_connections
                .min(settings.max_open_connections),
        ))
        .idle_timeout(Some(settings.max_conn_idle_time()))
        .build(config)
        .await
        .context("Failed to create DB connection pool")
}

/// Applies pending embedded migrations over a blocking connection and
/// returns how many ran.
pub async fn run_migrations(connection_string: String) -> anyhow::Result<usize> {
    tokio::task::spawn_blocking(move || {
        let mut connection = PgConnection::establish(&connection_string)
            .with_context(|| "failed to connect to the database for migrations")?;

        let versions = connection
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow!("failed to run migrations: {e}"))?;

        Ok(versions.len())
    })
    .await
    .context("migration task panicked")?
}

impl From<bb8::RunError<PoolError>> for BookError {
    fn from(error: bb8::RunError<PoolError>) -> Self {
        BookError::CouldNotQuery(format!(
            "problem getting a connection from the connection pool: {error}"
        ))
    }
}

impl From<diesel::result::Error> for BookError {
    fn from(error: diesel::result::Error) -> Self {
        match error {
            diesel::result::Error::NotFound => BookError::NotFound,
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                BookError::AlreadyExists
            }
            other => BookError::CouldNotQuery(other.to_string()),
        }
    }
}

/// Collects decoded rows, logging and dropping any row that fails to decode.
/// Any other error aborts the whole load.
async fn skip_undecodable(
    rows: impl Stream<Item = QueryResult<Book>>,
) -> Result<Vec<Book>, BookError> {
    let mut rows = pin!(rows);
    let mut books = Vec::new();

    while let Some(row) = rows.next().await {
        match row {
            Ok(book) => books.push(book),
            Err(diesel::result::Error::DeserializationError(e)) => {
                warn!("Skipping row that could not be decoded: {e}")
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(books)
}

#[derive(Clone)]
pub struct DatabaseBookRepo {
    pool: DBPool,
    validator: BookValidator,
}

impl DatabaseBookRepo {
    pub fn new(pool: DBPool, validator: BookValidator) -> Self {
        DatabaseBookRepo { pool, validator }
    }
}

impl BookRepo for DatabaseBookRepo {
    async fn save_book(&self, new_book: NewBook) -> Result<Book, BookError> {
        self.validator.ensure_valid(&new_book)?;

        let mut conn = self.pool.get().await?;

        let id = diesel::insert_into(books::table)
            .values(&new_book)
            .returning(books::id)
            .get_result::<i32>(&mut conn)
            .await
            .inspect_err(|e| warn!("Unable to save book to db: {e}"))?;

        Ok(new_book.into_book(id))
    }

    async fn get_book(&self, id: i32) -> Result<Book, BookError> {
        let id = ensure_serial(id)?;
        let mut conn = self.pool.get().await?;

        let maybe_book = books::table
            .find(id)
            .select(Book::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        maybe_book.ok_or(BookError::NotFound)
    }

    async fn get_all_books(&self) -> Result<Vec<Book>, BookError> {
        let mut conn = self.pool.get().await?;

        let rows = books::table
            .select(Book::as_select())
            .order(books::id.asc())
            .load_stream::<Book>(&mut conn)
            .await?;

        skip_undecodable(rows).await
    }

    async fn search_by_author(&self, author: &str) -> Result<Vec<Book>, BookError> {
        let author = ensure_search_term(FIELD_AUTHOR, author)?;
        let mut conn = self.pool.get().await?;

        let rows = books::table
            .filter(books::author.eq(author))
            .select(Book::as_select())
            .order(books::id.asc())
            .load_stream::<Book>(&mut conn)
            .await?;

        let books = skip_undecodable(rows).await?;
        if books.is_empty() {
            return Err(BookError::NotFoundByAuthor(author.to_string()));
        }

        Ok(books)
    }

    async fn search_by_title(&self, title: &str) -> Result<Vec<Book>, BookError> {
        let title = ensure_search_term(FIELD_TITLE, title)?;
        let mut conn = self.pool.get().await?;

        let rows = books::table
            .filter(books::title.eq(title))
            .select(Book::as_select())
            .order(books::id.asc())
            .load_stream::<Book>(&mut conn)
            .await?;

        let books = skip_undecodable(rows).await?;
        if books.is_empty() {
            return Err(BookError::NotFoundByTitle(title.to_string()));
        }

        Ok(books)
    }

    async fn update_book(&self, id: i32, new_book: NewBook) -> Result<Book, BookError> {
        let id = ensure_serial(id)?;
        self.validator.ensure_valid(&new_book)?;

        let mut conn = self.pool.get().await?;

        // A missing row shows up as an empty RETURNING set.
        let updated_book = diesel::update(books::table.find(id))
            .set(&new_book)
            .returning(Book::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?;

        updated_book.ok_or(BookError::NotFound)
    }

    async fn delete_book(&self, id: i32) -> Result<usize, BookError> {
        let id = ensure_serial(id)?;
        let mut conn = self.pool.get().await?;

        let deleted = diesel::delete(books::table.find(id))
            .execute(&mut conn)
            .await?;

        match deleted {
            0 => Err(BookError::NotFound),
            n => Ok(n),
        }
    }

    async fn delete_all_books(&self) -> Result<usize, BookError> {
        let mut conn = self.pool.get().await?;

        let deleted = diesel::delete(books::table).execute(&mut conn).await?;

        diesel::sql_query("ALTER SEQUENCE books_id_seq RESTART WITH 1")
            .execute(&mut conn)
            .await?;

        match deleted {
            0 => Err(BookError::NotFound),
            n => Ok(n),
        }
    }
}
