pub mod routine_validator;

pub use routine_validator::*;
