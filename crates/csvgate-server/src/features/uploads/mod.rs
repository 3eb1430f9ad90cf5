//! CSV upload intake

pub mod routes;

pub use routes::{uploads_routes, UploadAccepted, FILE_FIELD};
