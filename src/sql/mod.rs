//! Statements and their PostgreSQL rendering: identifiers from entity metadata only, values as parameters.

mod builder;
pub mod params;
mod statement;
pub use builder::*;
pub use params::*;
pub use statement::*;
