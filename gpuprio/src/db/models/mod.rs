//! Database record models matching table schemas.
//!
//! This module contains struct definitions that directly correspond to database
//! table rows. These models are used by repositories to return query results
//! and accept insertion/update data.
//!
//! Database models are distinct from API models (see [`crate::api::models`]) so
//! storage and API representations can evolve independently.
//!
//! - [`users`]: Users seen through the identity proxy
//! - [`admin_users`]: The administrator role store
//! - [`priorities`]: Priority requests and their messages

pub mod admin_users;
pub mod priorities;
pub mod users;
