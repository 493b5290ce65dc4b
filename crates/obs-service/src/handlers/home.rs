//! Home page handler.

/// Body returned by `GET /`.
pub const WELCOME_MESSAGE: &str = "Welcome to the Home Page!";

/// Handler for GET /
pub async fn home() -> &'static str {
    WELCOME_MESSAGE
}
