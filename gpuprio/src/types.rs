//! Common type definitions and permission system types.
//!
//! This module defines:
//! - Type aliases for entity IDs
//! - Permission and authorization types used in error reporting
//!
//! # ID Types
//!
//! - [`UserId`]: User account identifier
//! - [`PriorityId`]: Priority request identifier
//! - [`MessageId`]: Identifier of a message attached to a priority request
//!
//! # Permission System
//!
//! Access control is deliberately small: a request can be read by its requester or by an
//! administrator, and every mutation after submission is reserved to administrators.
//!
//! - [`Resource`]: What entity type is being accessed
//! - [`Operation`]: What action is being performed
//! - [`Permission`]: Authorization requirement combining resource and operation

use std::fmt;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type PriorityId = Uuid;
pub type MessageId = i64;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

// Operations that can be performed on resources
// *-All means unrestricted access, *-Own means restricted to own resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateOwn,
    ReadAll,
    ReadOwn,
    UpdateAll,
    DeleteAll,
}

// Resources that can be operated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Priorities,
    Admins,
}

// Permission types for authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    /// Simple permission: (Resource, Operation)
    Allow(Resource, Operation),
    /// Caller must be listed as an administrator
    Admin,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateOwn => write!(f, "Create"),
            Operation::ReadAll | Operation::ReadOwn => write!(f, "Read"),
            Operation::UpdateAll => write!(f, "Update"),
            Operation::DeleteAll => write!(f, "Delete"),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Priorities => write!(f, "priorities"),
            Resource::Admins => write!(f, "admins"),
        }
    }
}
