//! Storage backend traits.

mod identity;
mod vector;

pub use identity::IdentityBackend;
pub use vector::VectorBackend;
pub(crate) use vector::check_dimension;
