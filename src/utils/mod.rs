pub mod auth;
pub mod numbers;

pub use auth::{create_token, hash_password, verify_password, verify_token};
pub use numbers::{next_document_number, next_document_number_in_tx};
