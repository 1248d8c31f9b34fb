pub mod interactions;
pub mod query;
pub mod schema;

pub use query::AppState;
