//! Wire types for the ftpgate provisioning API.
//!
//! This crate has **no internal ftpgate dependencies**. The kernel consumes
//! [`CreateUserRequest`] and [`WritePermission`]; the server serializes the
//! response bodies.
//!
//! |-------------------------|-------------------------------------------|
//! | Type                    | Purpose                                   |
//! |-------------------------|-------------------------------------------|
//! | [`CreateUserRequest`]   | `POST /api/create_user` body              |
//! | [`CreateUserResponse`]  | success/failure verdict for the caller    |
//! | [`ListFoldersQuery`]    | `GET /api/list-folders` query string      |
//! | [`ListFoldersResponse`] | immediate subdirectories of a path        |
//! | [`WritePermission`]     | the `write_enable` flag for vsftpd        |
//! |-------------------------|-------------------------------------------|

pub mod api;
pub mod permission;

pub use api::{
    CreateUserRequest, CreateUserResponse, ErrorBody, FolderEntry, HealthResponse,
    ListFoldersQuery, ListFoldersResponse,
};
pub use permission::WritePermission;
