pub mod envelope;
pub mod error;
pub mod execution;
pub mod intent;
pub mod routine;
pub mod schema;
pub mod trace;

pub use envelope::*;
pub use error::*;
pub use execution::*;
pub use intent::*;
pub use routine::*;
pub use schema::*;
pub use trace::*;
