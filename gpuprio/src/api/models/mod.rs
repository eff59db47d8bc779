//! API request and response data models.
//!
//! These types define the JSON contract of the HTTP API and are kept separate
//! from the database models so that storage can change without breaking clients.
//! All of them derive `utoipa::ToSchema` for the generated OpenAPI document.
//!
//! - [`priorities`]: Priority request submissions, admin actions and responses
//! - [`gpus`]: GPU availability as reported by the probe
//! - [`users`]: The authenticated user
//! - [`pagination`]: Offset pagination shared by list endpoints

pub mod gpus;
pub mod pagination;
pub mod priorities;
pub mod users;
