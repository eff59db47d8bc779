//! HTTP request handlers.
//!
//! Handlers authenticate through the [`crate::api::models::users::CurrentUser`]
//! and [`crate::auth::current_user::AdminUser`] extractors and delegate every
//! state change to [`crate::lifecycle::PriorityLifecycle`]. Errors convert to
//! responses through [`crate::errors::Error`].
//!
//! - [`priorities`]: Submitting and viewing one's own requests
//! - [`admin`]: Reviewing, accepting, refusing and maintaining requests
//! - [`gpus`]: Current GPU availability
//! - [`users`]: The authenticated user

pub mod admin;
pub mod gpus;
pub mod priorities;
pub mod users;
