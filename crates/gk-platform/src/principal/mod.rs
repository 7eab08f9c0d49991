//! Principal Aggregate
//!
//! User identities: credential hash, role and active flag.

pub mod entity;
pub mod repository;
pub mod sqlite_repository;
pub mod api;

// Re-export main types
pub use entity::Principal;
pub use repository::{InMemoryPrincipalRepository, PrincipalFilter, PrincipalRepository, PrincipalStats};
pub use sqlite_repository::SqlitePrincipalRepository;
pub use api::{users_router, PrincipalResponse, UsersState};
