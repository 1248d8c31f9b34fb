pub mod sqlite;

pub use sqlite::InteractionStore;
