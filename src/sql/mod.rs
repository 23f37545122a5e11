//! Safe SQL building and execution plumbing: identifiers from validated
//! schemas only, values as parameters.

mod builder;
pub mod params;
mod row;

pub use builder::*;
pub use params::BindValue;
pub use row::row_to_json;
