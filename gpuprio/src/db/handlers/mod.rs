//! Repository implementations for database access.
//!
//! Each repository wraps a SQLx connection or transaction and exposes
//! strongly-typed operations returning models from [`crate::db::models`].
//! Create repositories from a transaction when several statements must be
//! atomic:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let mut repo = Priorities::new(&mut tx);
//! let request = repo.get_for_update(id).await?;
//! // ... validate, write ...
//! tx.commit().await?;
//! ```
//!
//! - [`Priorities`]: Priority requests and their messages
//! - [`Users`]: Users seen through the identity proxy
//! - [`AdminUsers`]: The administrator role store

pub mod admin_users;
pub mod priorities;
pub mod users;

pub use admin_users::AdminUsers;
pub use priorities::Priorities;
pub use users::Users;
