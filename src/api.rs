use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Request, State},
    http::{request::Parts, Method, StatusCode, Uri},
    routing::get,
    Json, Router,
};
use serde::de::DeserializeOwned;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::error::BookError;
use crate::models::{Book, BookPayload};
use crate::repo::{ensure_serial, BookRepo};
use crate::response::{ok, Envelope};
use crate::validator::BookValidator;

#[derive(Clone)]
struct AppState<R> {
    repo: R,
    validator: BookValidator,
}

type ApiResult<T> = Result<Json<Envelope<T>>, BookError>;

pub fn build_api<R>(repo: R, validator: BookValidator) -> Router
where
    R: BookRepo + Send + Sync + Clone + 'static,
{
    Router::new()
        .route(
            "/book",
            get(get_all_books::<R>)
                .post(save_book::<R>)
                .put(update_book_from_body::<R>)
                .delete(delete_all_books::<R>),
        )
        .route(
            "/book/{id}",
            get(get_book::<R>)
                .put(update_book::<R>)
                .delete(delete_book::<R>),
        )
        .route("/book/author", get(search_by_missing_author::<R>))
        .route("/book/author/", get(search_by_missing_author::<R>))
        .route("/book/author/{author}", get(search_by_author::<R>))
        .route("/book/title", get(search_by_missing_title::<R>))
        .route("/book/title/", get(search_by_missing_title::<R>))
        .route("/book/title/{title}", get(search_by_title::<R>))
        .fallback(unknown_route)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(AppState { repo, validator })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// JSON body extractor that reports an empty body and malformed JSON as
/// [`BookError`]s, so they share the response envelope.
struct JsonBody<T>(T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = BookError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| match rejection.status() {
                StatusCode::PAYLOAD_TOO_LARGE => {
                    BookError::PayloadTooLarge(rejection.body_text())
                }
                _ => BookError::BadRequest(rejection.body_text()),
            })?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(BookError::EmptyBody);
        }

        serde_json::from_slice(&bytes)
            .map(JsonBody)
            .map_err(|e| BookError::BadRequest(format!("Invalid JSON body: {e}")))
    }
}

/// Path extractor whose rejections (e.g. a segment that is not valid UTF-8)
/// go through [`BookError`] like every other failure.
struct BookPath<T>(T);

impl<S, T> FromRequestParts<S> for BookPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = BookError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<T>::from_request_parts(parts, state)
            .await
            .map(|Path(value)| BookPath(value))
            .map_err(|rejection| BookError::BadRequest(rejection.body_text()))
    }
}

async fn unknown_route(uri: Uri) -> BookError {
    info!("No route for {}", uri.path());
    BookError::NotFound
}

async fn method_not_allowed(method: Method, uri: Uri) -> BookError {
    BookError::BadRequest(format!("Method {} not allowed on {}", method, uri.path()))
}

async fn get_all_books<R>(State(state): State<AppState<R>>) -> ApiResult<Vec<Book>>
where
    R: BookRepo,
{
    let books = state.repo.get_all_books().await?;

    info!("Retrieved {} books from the DB", books.len());

    Ok(ok(books))
}

async fn get_book<R>(
    State(state): State<AppState<R>>,
    BookPath(id): BookPath<String>,
) -> ApiResult<Book>
where
    R: BookRepo,
{
    let id = parse_book_id(&id)?;

    let book = state.repo.get_book(id).await?;

    info!("Retrieved book from DB: {:?}", book);

    Ok(ok(book))
}

async fn search_by_author<R>(
    State(state): State<AppState<R>>,
    BookPath(author): BookPath<String>,
) -> ApiResult<Vec<Book>>
where
    R: BookRepo,
{
    let books = state.repo.search_by_author(&author).await?;

    info!("Found {} books by author {}", books.len(), author);

    Ok(ok(books))
}

async fn search_by_missing_author<R>(State(state): State<AppState<R>>) -> ApiResult<Vec<Book>>
where
    R: BookRepo,
{
    Ok(ok(state.repo.search_by_author("").await?))
}

async fn search_by_title<R>(
    State(state): State<AppState<R>>,
    BookPath(title): BookPath<String>,
) -> ApiResult<Vec<Book>>
where
    R: BookRepo,
{
    let books = state.repo.search_by_title(&title).await?;

    info!("Found {} books titled {}", books.len(), title);

    Ok(ok(books))
}

async fn search_by_missing_title<R>(State(state): State<AppState<R>>) -> ApiResult<Vec<Book>>
where
    R: BookRepo,
{
    Ok(ok(state.repo.search_by_title("").await?))
}

async fn save_book<R>(
    State(state): State<AppState<R>>,
    JsonBody(payload): JsonBody<BookPayload>,
) -> ApiResult<Book>
where
    R: BookRepo,
{
    let new_book = payload.into_new_book(&state.validator)?;

    let saved_book = state.repo.save_book(new_book).await?;

    info!("Inserted book into the DB: {:?}", saved_book);

    Ok(ok(saved_book))
}

async fn update_book<R>(
    State(state): State<AppState<R>>,
    BookPath(id): BookPath<String>,
    JsonBody(payload): JsonBody<BookPayload>,
) -> ApiResult<Book>
where
    R: BookRepo,
{
    let id = parse_book_id(&id)?;

    if payload.id.is_some_and(|body_id| body_id != id) {
        return Err(BookError::BadRequest(format!(
            "Book ID in body does not match book ID {} in path",
            id
        )));
    }

    apply_update(&state, id, payload).await
}

/// `PUT /book` carries the id inside the body instead of the path.
async fn update_book_from_body<R>(
    State(state): State<AppState<R>>,
    JsonBody(payload): JsonBody<BookPayload>,
) -> ApiResult<Book>
where
    R: BookRepo,
{
    let id = payload.id.ok_or(BookError::InvalidSerial)?;

    apply_update(&state, id, payload).await
}

async fn apply_update<R>(state: &AppState<R>, id: i32, payload: BookPayload) -> ApiResult<Book>
where
    R: BookRepo,
{
    let id = ensure_serial(id)?;
    let new_book = payload.into_new_book(&state.validator)?;

    let updated_book = state.repo.update_book(id, new_book).await?;

    info!("Updated book in DB: {:?}", updated_book);

    Ok(ok(updated_book))
}

async fn delete_book<R>(
    State(state): State<AppState<R>>,
    BookPath(id): BookPath<String>,
) -> ApiResult<usize>
where
    R: BookRepo,
{
    let id = parse_book_id(&id)?;

    let deleted = state.repo.delete_book(id).await?;

    info!("Deleted book from DB with ID: {}", id);

    Ok(ok(deleted))
}

async fn delete_all_books<R>(State(state): State<AppState<R>>) -> ApiResult<usize>
where
    R: BookRepo,
{
    let deleted = state.repo.delete_all_books().await?;

    info!("Deleted all {} books from the DB", deleted);

    Ok(ok(deleted))
}

fn parse_book_id(id: &str) -> Result<i32, BookError> {
    id.parse::<i32>()
        .map_err(|_| BookError::BadRequest(format!("Invalid book ID: {}", id)))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        body::Body,
        http::{header, Method, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::models::NewBook;
    use crate::repo::ensure_search_term;
    use crate::validator::{FIELD_AUTHOR, FIELD_TITLE};

    struct Store {
        books: Vec<Book>,
        next_id: i32,
    }

    /// Keeps books in memory and mirrors the guard clauses of the database repo.
    #[derive(Clone)]
    struct InMemoryBookRepo {
        store: Arc<Mutex<Store>>,
        validator: BookValidator,
    }

    impl InMemoryBookRepo {
        fn new(validator: BookValidator) -> Self {
            InMemoryBookRepo {
                store: Arc::new(Mutex::new(Store {
                    books: Vec::new(),
                    next_id: 1,
                })),
                validator,
            }
        }
    }

    impl BookRepo for InMemoryBookRepo {
        async fn save_book(&self, new_book: NewBook) -> Result<Book, BookError> {
            self.validator.ensure_valid(&new_book)?;
            let mut store = self.store.lock().unwrap();
            let book = new_book.into_book(store.next_id);
            store.next_id += 1;
            store.books.push(book.clone());
            Ok(book)
        }

        async fn get_book(&self, id: i32) -> Result<Book, BookError> {
            let id = ensure_serial(id)?;
            let store = self.store.lock().unwrap();
            store
                .books
                .iter()
                .find(|b| b.id == id)
                .cloned()
                .ok_or(BookError::NotFound)
        }

        async fn get_all_books(&self) -> Result<Vec<Book>, BookError> {
            Ok(self.store.lock().unwrap().books.clone())
        }

        async fn search_by_author(&self, author: &str) -> Result<Vec<Book>, BookError> {
            let author = ensure_search_term(FIELD_AUTHOR, author)?;
            let store = self.store.lock().unwrap();
            let books: Vec<Book> = store
                .books
                .iter()
                .filter(|b| b.author == author)
                .cloned()
                .collect();
            if books.is_empty() {
                return Err(BookError::NotFoundByAuthor(author.to_string()));
            }
            Ok(books)
        }

        async fn search_by_title(&self, title: &str) -> Result<Vec<Book>, BookError> {
            let title = ensure_search_term(FIELD_TITLE, title)?;
            let store = self.store.lock().unwrap();
            let books: Vec<Book> = store
                .books
                .iter()
                .filter(|b| b.title == title)
                .cloned()
                .collect();
            if books.is_empty() {
                return Err(BookError::NotFoundByTitle(title.to_string()));
            }
            Ok(books)
        }

        async fn update_book(&self, id: i32, new_book: NewBook) -> Result<Book, BookError> {
            let id = ensure_serial(id)?;
            self.validator.ensure_valid(&new_book)?;
            let mut store = self.store.lock().unwrap();
            let slot = store
                .books
                .iter_mut()
                .find(|b| b.id == id)
                .ok_or(BookError::NotFound)?;
            *slot = new_book.into_book(id);
            Ok(slot.clone())
        }

        async fn delete_book(&self, id: i32) -> Result<usize, BookError> {
            let id = ensure_serial(id)?;
            let mut store = self.store.lock().unwrap();
            let before = store.books.len();
            store.books.retain(|b| b.id != id);
            match before - store.books.len() {
                0 => Err(BookError::NotFound),
                n => Ok(n),
            }
        }

        async fn delete_all_books(&self) -> Result<usize, BookError> {
            let mut store = self.store.lock().unwrap();
            let deleted = store.books.len();
            store.books.clear();
            store.next_id = 1;
            match deleted {
                0 => Err(BookError::NotFound),
                n => Ok(n),
            }
        }
    }

    fn app() -> Router {
        let validator = BookValidator::with_clock(|| 2024);
        build_api(InMemoryBookRepo::new(validator.clone()), validator)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = axum::http::Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response: Response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn fahrenheit() -> Value {
        json!({
            "title": "Fahrenheit 451",
            "author": "Ray Bradbury",
            "year": 1953,
            "description": "A dystopian novel"
        })
    }

    #[tokio::test]
    async fn save_book_returns_book_with_id() {
        let app = app();

        let (status, body) = send(&app, Method::POST, "/book", Some(fahrenheit())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "data": {
                    "id": 1,
                    "title": "Fahrenheit 451",
                    "author": "Ray Bradbury",
                    "year": 1953,
                    "description": "A dystopian novel"
                },
                "error": null
            })
        );
    }

    #[tokio::test]
    async fn save_book_without_title_is_a_field_error() {
        let app = app();

        let (status, body) = send(
            &app,
            Method::POST,
            "/book",
            Some(json!({"author": "Ray Bradbury", "year": 1953})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"]["fields"],
            json!([{"field": "Title", "msg": "Title cannot be empty"}])
        );
        assert_eq!(body["data"], Value::Null);
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let app = app();
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/book")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["msg"], "Expected body, found EOF");
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let app = app();

        let (status, body) = send(
            &app,
            Method::POST,
            "/book",
            Some(json!({"title": "Dune", "author": "Frank Herbert", "year": "long ago"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["msg"]
            .as_str()
            .unwrap()
            .starts_with("Invalid JSON body"));
    }

    #[tokio::test]
    async fn get_book_zero_is_invalid_serial() {
        let (status, body) = send(&app(), Method::GET, "/book/0", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"]["msg"],
            "Invalid serial. Serial must be more than 1"
        );
    }

    #[tokio::test]
    async fn non_numeric_id_is_a_bad_request() {
        let (status, body) = send(&app(), Method::GET, "/book/abc", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["msg"], "Invalid book ID: abc");
    }

    #[tokio::test]
    async fn missing_book_is_not_found() {
        let (status, body) = send(&app(), Method::GET, "/book/42", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["msg"], "Book(s) not found in db");
    }

    #[tokio::test]
    async fn empty_store_lists_no_books() {
        let (status, body) = send(&app(), Method::GET, "/book", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"data": [], "error": null}));
    }

    #[tokio::test]
    async fn search_by_author_and_title() {
        let app = app();
        send(&app, Method::POST, "/book", Some(fahrenheit())).await;

        let (status, body) = send(&app, Method::GET, "/book/author/Ray%20Bradbury", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["title"], "Fahrenheit 451");

        let (status, body) = send(&app, Method::GET, "/book/title/Fahrenheit%20451", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["author"], "Ray Bradbury");

        let (status, body) = send(&app, Method::GET, "/book/author/Frank%20Herbert", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body["error"]["msg"],
            "Book(s) with author Frank Herbert not found in db"
        );

        let (status, body) = send(&app, Method::GET, "/book/title/Dune", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["msg"], "Book(s) with title Dune not found in db");
    }

    #[tokio::test]
    async fn search_without_term_is_a_field_error() {
        let app = app();

        let (status, body) = send(&app, Method::GET, "/book/author", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["fields"][0]["msg"], "Author cannot be empty");

        let (status, body) = send(&app, Method::GET, "/book/title", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["fields"][0]["msg"], "Title cannot be empty");
    }

    #[tokio::test]
    async fn update_replaces_every_field_but_id() {
        let app = app();
        send(&app, Method::POST, "/book", Some(fahrenheit())).await;

        let (status, body) = send(
            &app,
            Method::PUT,
            "/book/1",
            Some(json!({"title": "Dandelion Wine", "author": "Ray Bradbury", "year": 1957})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"],
            json!({"id": 1, "title": "Dandelion Wine", "author": "Ray Bradbury", "year": 1957})
        );

        let (_, body) = send(&app, Method::GET, "/book/1", None).await;
        assert_eq!(body["data"]["title"], "Dandelion Wine");
        assert_eq!(body["data"].get("description"), None);
    }

    #[tokio::test]
    async fn update_with_id_in_body() {
        let app = app();
        send(&app, Method::POST, "/book", Some(fahrenheit())).await;

        let (status, body) = send(
            &app,
            Method::PUT,
            "/book",
            Some(json!({"id": 1, "title": "The Martian Chronicles", "author": "Ray Bradbury", "year": 1950})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["title"], "The Martian Chronicles");

        let (status, body) = send(&app, Method::PUT, "/book", Some(fahrenheit())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"]["msg"],
            "Invalid serial. Serial must be more than 1"
        );
    }

    #[tokio::test]
    async fn update_rejects_conflicting_ids() {
        let app = app();
        send(&app, Method::POST, "/book", Some(fahrenheit())).await;

        let mut payload = fahrenheit();
        payload["id"] = json!(2);
        let (status, body) = send(&app, Method::PUT, "/book/1", Some(payload)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"]["msg"],
            "Book ID in body does not match book ID 1 in path"
        );

        let mut payload = fahrenheit();
        payload["id"] = json!(1);
        let (status, _) = send(&app, Method::PUT, "/book/1", Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn update_of_missing_book_is_not_found() {
        let (status, _) = send(&app(), Method::PUT, "/book/9", Some(fahrenheit())).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleting_twice_is_not_found() {
        let app = app();
        send(&app, Method::POST, "/book", Some(fahrenheit())).await;

        let (status, body) = send(&app, Method::DELETE, "/book/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"data": 1, "error": null}));

        let (status, body) = send(&app, Method::DELETE, "/book/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["msg"], "Book(s) not found in db");
    }

    #[tokio::test]
    async fn delete_all_then_again_is_not_found() {
        let app = app();
        send(&app, Method::POST, "/book", Some(fahrenheit())).await;
        send(&app, Method::POST, "/book", Some(fahrenheit())).await;

        let (status, body) = send(&app, Method::DELETE, "/book", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], 2);

        let (status, _) = send(&app, Method::DELETE, "/book", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(&app, Method::POST, "/book", Some(fahrenheit())).await;
        assert_eq!(body["data"]["id"], 1);
    }

    #[tokio::test]
    async fn undecodable_path_segment_uses_envelope() {
        let app = app();

        let (status, body) = send(&app, Method::GET, "/book/author/%FF", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["data"], Value::Null);
        assert!(body["error"]["msg"].is_string());

        let (status, body) = send(&app, Method::GET, "/book/title/%C3", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["msg"].is_string());
    }

    #[tokio::test]
    async fn trailing_slash_search_is_an_empty_term() {
        let (status, body) = send(&app(), Method::GET, "/book/title/", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["fields"][0]["msg"], "Title cannot be empty");
    }

    #[tokio::test]
    async fn unknown_route_uses_envelope() {
        let (status, body) = send(&app(), Method::GET, "/shelf/1", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({"data": null, "error": {"msg": "Book(s) not found in db"}})
        );
    }

    #[tokio::test]
    async fn unsupported_method_uses_envelope() {
        let (status, body) = send(&app(), Method::PATCH, "/book/1", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["msg"], "Method PATCH not allowed on /book/1");
    }

    #[tokio::test]
    async fn oversized_body_is_payload_too_large() {
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/book")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(vec![b'x'; 2 * 1024 * 1024 + 1]))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"]["msg"].is_string());
    }
}
