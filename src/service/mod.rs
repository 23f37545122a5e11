//! CrudService: lifecycle orchestration over the schema engine, query
//! engine, and relationship processor.

mod crud;
mod validation;

pub use crud::CrudService;
pub use validation::RequestValidator;
