//! Direct-to-storage upload credentials

pub mod routes;

pub use routes::{credentials_routes, CredentialsQuery};
