//! Account request validation.
//!
//! Everything here runs before the first side effect: a request that fails
//! these checks never touches the jail, the store, or the config directory.

use ftpgate_types::{CreateUserRequest, WritePermission};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Failure category of a provisioning attempt.
///
/// Validation kinds are the caller's fault and map to HTTP 400; the rest are
/// side-effect failures and map to 500.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    MissingField,
    InvalidField,
    InvalidPath,
    DirectoryNotFound,
    DuplicateAccount,
    StoreUnavailable,
    IndexBuildFailed,
    ConfigWriteFailed,
    ReloadFailed,
    OperationTimeout,
}

impl ErrorKind {
    /// True when the caller can fix the request and retry.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingField
                | Self::InvalidField
                | Self::InvalidPath
                | Self::DirectoryNotFound
                | Self::DuplicateAccount
        )
    }
}

/// A request field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingField(_) => ErrorKind::MissingField,
            Self::InvalidField { .. } => ErrorKind::InvalidField,
        }
    }
}

/// A create-user request whose fields passed validation.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountRequest {
    pub username: String,
    pub password: String,
    pub requested_path: String,
    pub write: WritePermission,
}

// Keep the password out of logs.
impl std::fmt::Debug for AccountRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("requested_path", &self.requested_path)
            .field("write", &self.write)
            .finish()
    }
}

impl AccountRequest {
    /// Check presence first (`username`, `password`, `user_folder`, in that
    /// order), then content.
    pub fn parse(request: &CreateUserRequest) -> Result<Self, RequestError> {
        for (field, value) in [
            ("username", &request.username),
            ("password", &request.password),
            ("user_folder", &request.user_folder),
        ] {
            if value.is_empty() {
                return Err(RequestError::MissingField(field));
            }
        }

        check_line_safe("username", &request.username)?;
        check_line_safe("password", &request.password)?;
        check_file_name(&request.username)?;

        Ok(Self {
            username: request.username.clone(),
            password: request.password.clone(),
            requested_path: request.user_folder.clone(),
            write: WritePermission::from_flag(&request.write_permission),
        })
    }
}

/// The store is newline-delimited with no escaping.
fn check_line_safe(field: &'static str, value: &str) -> Result<(), RequestError> {
    if value.contains(['\n', '\r']) {
        return Err(RequestError::InvalidField {
            field,
            reason: "must not contain line breaks",
        });
    }
    Ok(())
}

/// The username doubles as a file name in the per-user config directory.
fn check_file_name(username: &str) -> Result<(), RequestError> {
    let reason = if username.contains('/') {
        "must not contain '/'"
    } else if username == "." || username == ".." {
        "must not be '.' or '..'"
    } else if username.contains('\0') {
        "must not contain NUL"
    } else {
        return Ok(());
    };
    Err(RequestError::InvalidField {
        field: "username",
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, password: &str, folder: &str, write: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.into(),
            password: password.into(),
            user_folder: folder.into(),
            write_permission: write.into(),
        }
    }

    #[test]
    fn test_valid_request() {
        let parsed = AccountRequest::parse(&request("alice", "p@ss", "/clients/alice", "Yes")).unwrap();
        assert_eq!(parsed.username, "alice");
        assert_eq!(parsed.requested_path, "/clients/alice");
        assert_eq!(parsed.write, WritePermission::Enabled);
    }

    #[test]
    fn test_absent_write_permission_disables() {
        let parsed = AccountRequest::parse(&request("alice", "p@ss", "/a", "")).unwrap();
        assert_eq!(parsed.write, WritePermission::Disabled);
    }

    #[test]
    fn test_missing_fields_in_order() {
        assert_eq!(
            AccountRequest::parse(&request("", "", "", "")),
            Err(RequestError::MissingField("username"))
        );
        assert_eq!(
            AccountRequest::parse(&request("alice", "", "", "")),
            Err(RequestError::MissingField("password"))
        );
        assert_eq!(
            AccountRequest::parse(&request("alice", "p@ss", "", "yes")),
            Err(RequestError::MissingField("user_folder"))
        );
    }

    #[test]
    fn test_line_breaks_rejected() {
        let err = AccountRequest::parse(&request("alice\nbob", "p", "/a", "")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidField);

        let err = AccountRequest::parse(&request("alice", "p\r\n", "/a", "")).unwrap_err();
        assert!(matches!(err, RequestError::InvalidField { field: "password", .. }));
    }

    #[test]
    fn test_unsafe_file_names_rejected() {
        for name in ["../evil", "a/b", ".", "..", "nul\0"] {
            let err = AccountRequest::parse(&request(name, "p", "/a", "")).unwrap_err();
            assert!(
                matches!(err, RequestError::InvalidField { field: "username", .. }),
                "{name:?}"
            );
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let parsed = AccountRequest::parse(&request("alice", "hunter2", "/a", "")).unwrap();
        let debug = format!("{parsed:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("alice"));
    }

    #[test]
    fn test_kind_classification() {
        assert!(ErrorKind::DuplicateAccount.is_validation());
        assert!(ErrorKind::DirectoryNotFound.is_validation());
        assert!(!ErrorKind::IndexBuildFailed.is_validation());
        assert!(!ErrorKind::OperationTimeout.is_validation());
        assert_eq!(ErrorKind::ReloadFailed.to_string(), "ReloadFailed");
    }
}
