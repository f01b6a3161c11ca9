//! The `write_enable` flag.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Whether a virtual user may write inside its home directory.
///
/// Parsed from the caller's free-form `write_permission` field: only the
/// literal `yes` (any case) enables writes. Renders as vsftpd's `YES`/`NO`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum WritePermission {
    #[strum(to_string = "YES", serialize = "yes")]
    Enabled,
    #[default]
    #[strum(to_string = "NO", serialize = "no")]
    Disabled,
}

impl WritePermission {
    /// Interpret a caller-supplied flag. Anything but `yes` disables writes.
    pub fn from_flag(flag: &str) -> Self {
        match <Self as FromStr>::from_str(flag) {
            Ok(Self::Enabled) => Self::Enabled,
            _ => Self::Disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yes_any_case_enables() {
        assert_eq!(WritePermission::from_flag("yes"), WritePermission::Enabled);
        assert_eq!(WritePermission::from_flag("Yes"), WritePermission::Enabled);
        assert_eq!(WritePermission::from_flag("YES"), WritePermission::Enabled);
    }

    #[test]
    fn test_everything_else_disables() {
        for flag in ["no", "", "true", "1", "y", "yess", " yes", "enabled"] {
            assert_eq!(
                WritePermission::from_flag(flag),
                WritePermission::Disabled,
                "flag {flag:?}"
            );
        }
    }

    #[test]
    fn test_renders_vsftpd_values() {
        assert_eq!(WritePermission::Enabled.to_string(), "YES");
        assert_eq!(WritePermission::Disabled.to_string(), "NO");
    }
}
