//! Secret store and content materializer

pub mod format;
pub mod materialize;
pub mod store;

pub use format::SecretFormat;
pub use materialize::{hashed_name, materialize};
pub use store::SecretStore;
