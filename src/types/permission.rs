use std::fmt;

use serde::{Deserialize, Serialize};

/// Permission represents a bitmask of granted permissions.
///
/// The `admin` bit is the single super-permission: every authorization
/// decision goes through [`Permission::has`] after [`Permission::expand_implied`],
/// so no caller ever compares role ids or names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u32);

impl Permission {
    pub const DEFECT_READ: Permission = Permission(1 << 0); // 1
    pub const DEFECT_WRITE: Permission = Permission(1 << 1); // 2
    pub const DEFECT_REVIEW: Permission = Permission(1 << 2); // 4
    pub const PROJECT_READ: Permission = Permission(1 << 3); // 8
    pub const PROJECT_WRITE: Permission = Permission(1 << 4); // 16
    pub const PROJECT_ADMIN: Permission = Permission(1 << 5); // 32
    pub const ADMIN: Permission = Permission(1 << 6); // 64

    const ALL: Permission = Permission(
        Self::DEFECT_READ.0
            | Self::DEFECT_WRITE.0
            | Self::DEFECT_REVIEW.0
            | Self::PROJECT_READ.0
            | Self::PROJECT_WRITE.0
            | Self::PROJECT_ADMIN.0
            | Self::ADMIN.0,
    );

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if this permission bitmask contains the required permission.
    #[must_use]
    pub const fn has(self, required: Permission) -> bool {
        self.0 & required.0 == required.0
    }

    /// Combines two permission bitmasks.
    #[must_use]
    pub const fn union(self, other: Permission) -> Permission {
        Permission(self.0 | other.0)
    }

    /// Removes permissions from this bitmask.
    #[must_use]
    pub const fn difference(self, other: Permission) -> Permission {
        Permission(self.0 & !other.0)
    }

    /// Expands a permission bitmask to include implied permissions.
    /// admin implies everything; project:admin implies project:write implies
    /// project:read; defect:write and defect:review each imply defect:read.
    /// This should only be used for ALLOW permissions, never for DENY.
    #[must_use]
    pub fn expand_implied(self) -> Permission {
        if self.has(Self::ADMIN) {
            return Self::ALL;
        }

        let mut result = self.0;

        if self.has(Self::PROJECT_ADMIN) {
            result |= Self::PROJECT_WRITE.0;
        }
        if Permission(result).has(Self::PROJECT_WRITE) {
            result |= Self::PROJECT_READ.0;
        }

        if self.has(Self::DEFECT_WRITE) || self.has(Self::DEFECT_REVIEW) {
            result |= Self::DEFECT_READ.0;
        }

        Permission(result)
    }

    /// Converts a permission string to its bitmask value.
    pub fn parse(s: &str) -> Option<Permission> {
        match s {
            "defect:read" => Some(Self::DEFECT_READ),
            "defect:write" => Some(Self::DEFECT_WRITE),
            "defect:review" => Some(Self::DEFECT_REVIEW),
            "project:read" => Some(Self::PROJECT_READ),
            "project:write" => Some(Self::PROJECT_WRITE),
            "project:admin" => Some(Self::PROJECT_ADMIN),
            "admin" => Some(Self::ADMIN),
            _ => None,
        }
    }

    /// Converts a slice of permission strings to a combined bitmask.
    pub fn parse_many(strs: &[&str]) -> Option<Permission> {
        let mut result = Permission::default();
        for s in strs {
            result = result.union(Self::parse(s)?);
        }
        Some(result)
    }

    /// Returns a slice of permission strings for this bitmask.
    #[must_use]
    pub fn to_strings(self) -> Vec<&'static str> {
        let mut perms = Vec::new();
        if self.has(Self::DEFECT_READ) {
            perms.push("defect:read");
        }
        if self.has(Self::DEFECT_WRITE) {
            perms.push("defect:write");
        }
        if self.has(Self::DEFECT_REVIEW) {
            perms.push("defect:review");
        }
        if self.has(Self::PROJECT_READ) {
            perms.push("project:read");
        }
        if self.has(Self::PROJECT_WRITE) {
            perms.push("project:write");
        }
        if self.has(Self::PROJECT_ADMIN) {
            perms.push("project:admin");
        }
        if self.has(Self::ADMIN) {
            perms.push("admin");
        }
        perms
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_strings().join(", "))
    }
}

impl From<u32> for Permission {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl From<Permission> for u32 {
    fn from(p: Permission) -> Self {
        p.0
    }
}

impl From<i64> for Permission {
    fn from(bits: i64) -> Self {
        Self(bits as u32)
    }
}

impl From<Permission> for i64 {
    fn from(p: Permission) -> Self {
        p.0 as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_has() {
        let p = Permission::DEFECT_READ.union(Permission::DEFECT_WRITE);
        assert!(p.has(Permission::DEFECT_READ));
        assert!(p.has(Permission::DEFECT_WRITE));
        assert!(!p.has(Permission::DEFECT_REVIEW));
    }

    #[test]
    fn test_expand_implied() {
        let review = Permission::DEFECT_REVIEW;
        let expanded = review.expand_implied();
        assert!(expanded.has(Permission::DEFECT_REVIEW));
        assert!(expanded.has(Permission::DEFECT_READ));
        assert!(!expanded.has(Permission::DEFECT_WRITE));

        let pa = Permission::PROJECT_ADMIN.expand_implied();
        assert!(pa.has(Permission::PROJECT_WRITE));
        assert!(pa.has(Permission::PROJECT_READ));
    }

    #[test]
    fn test_admin_implies_everything() {
        let expanded = Permission::ADMIN.expand_implied();
        assert!(expanded.has(Permission::DEFECT_READ));
        assert!(expanded.has(Permission::DEFECT_WRITE));
        assert!(expanded.has(Permission::DEFECT_REVIEW));
        assert!(expanded.has(Permission::PROJECT_ADMIN));
        assert!(expanded.has(Permission::ADMIN));
    }

    #[test]
    fn test_parse_permission() {
        assert_eq!(
            Permission::parse("defect:review"),
            Some(Permission::DEFECT_REVIEW)
        );
        assert_eq!(Permission::parse("admin"), Some(Permission::ADMIN));
        assert_eq!(Permission::parse("invalid"), None);
    }

    #[test]
    fn test_difference_is_not_expanded() {
        // Deny bits subtract exactly what they name.
        let allow = Permission::DEFECT_WRITE.expand_implied();
        let effective = allow.difference(Permission::DEFECT_WRITE);
        assert!(!effective.has(Permission::DEFECT_WRITE));
        assert!(effective.has(Permission::DEFECT_READ));
    }
}
