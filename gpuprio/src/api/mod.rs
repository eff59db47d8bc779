//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **GPUs** (`/api/available-gpus`, `/api/v1/gpu-catalog`): Free GPUs reported by the cluster probe
//!   and the GPU types a request may ask for
//! - **Priorities** (`/api/v1/priorities/*`): Submitting and tracking requests
//! - **Admin** (`/api/v1/admin/priorities/*`): Review and maintenance, administrators only
//!
//! Every endpoint is documented with `utoipa`; the rendered reference lives at
//! `/api/docs` when the server is running.

pub mod handlers;
pub mod models;
