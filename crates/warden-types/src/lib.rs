pub mod error;
pub mod model;

pub use error::{PersistError, WardenError};
pub use model::*;
