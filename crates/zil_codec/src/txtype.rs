//! Record type tags.

use std::fmt;

/// Case-insensitive flag carried in the top bit of the on-disk type field.
pub const TX_CI: u64 = 1 << 63;

/// Number of record types, including the commit marker.
pub const TX_MAX_TYPE: usize = 21;

/// Type of a log record.
///
/// The discriminants are the on-disk values. [`TxType::Commit`] exists only
/// in memory (it marks a commit waiter in the pending queue) and is never
/// accepted by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TxType {
    /// Commit marker, no on-disk state.
    Commit = 0,
    /// Create file.
    Create = 1,
    /// Make directory.
    Mkdir = 2,
    /// Make extended-attribute directory.
    Mkxattr = 3,
    /// Create symbolic link.
    Symlink = 4,
    /// Remove file.
    Remove = 5,
    /// Remove directory.
    Rmdir = 6,
    /// Create hard link.
    Link = 7,
    /// Rename.
    Rename = 8,
    /// File write.
    Write = 9,
    /// Truncate.
    Truncate = 10,
    /// Set attributes.
    Setattr = 11,
    /// Set old-format ACL.
    AclV0 = 12,
    /// Set ACL.
    Acl = 13,
    /// Create with ACL.
    CreateAcl = 14,
    /// Create with extended attributes.
    CreateAttr = 15,
    /// Create with ACL and extended attributes.
    CreateAclAttr = 16,
    /// Mkdir with ACL.
    MkdirAcl = 17,
    /// Mkdir with extended attributes.
    MkdirAttr = 18,
    /// Mkdir with ACL and extended attributes.
    MkdirAclAttr = 19,
    /// Write whose block was already synced outside the log.
    Write2 = 20,
}

impl TxType {
    /// All types in on-disk order.
    pub const ALL: [TxType; TX_MAX_TYPE] = [
        Self::Commit,
        Self::Create,
        Self::Mkdir,
        Self::Mkxattr,
        Self::Symlink,
        Self::Remove,
        Self::Rmdir,
        Self::Link,
        Self::Rename,
        Self::Write,
        Self::Truncate,
        Self::Setattr,
        Self::AclV0,
        Self::Acl,
        Self::CreateAcl,
        Self::CreateAttr,
        Self::CreateAclAttr,
        Self::MkdirAcl,
        Self::MkdirAttr,
        Self::MkdirAclAttr,
        Self::Write2,
    ];

    /// Converts a raw type value (without the CI bit) to a type.
    #[must_use]
    pub fn from_u64(value: u64) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    /// Splits an on-disk type field into the type and its CI flag.
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<(Self, bool)> {
        Self::from_u64(raw & !TX_CI).map(|t| (t, raw & TX_CI != 0))
    }

    /// Returns the on-disk value of the type.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self as u64
    }

    /// Returns the table index of the type.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns the canonical name, e.g. `TX_WRITE`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Commit => "TX_COMMIT",
            Self::Create => "TX_CREATE",
            Self::Mkdir => "TX_MKDIR",
            Self::Mkxattr => "TX_MKXATTR",
            Self::Symlink => "TX_SYMLINK",
            Self::Remove => "TX_REMOVE",
            Self::Rmdir => "TX_RMDIR",
            Self::Link => "TX_LINK",
            Self::Rename => "TX_RENAME",
            Self::Write => "TX_WRITE",
            Self::Truncate => "TX_TRUNCATE",
            Self::Setattr => "TX_SETATTR",
            Self::AclV0 => "TX_ACL_V0",
            Self::Acl => "TX_ACL",
            Self::CreateAcl => "TX_CREATE_ACL",
            Self::CreateAttr => "TX_CREATE_ATTR",
            Self::CreateAclAttr => "TX_CREATE_ACL_ATTR",
            Self::MkdirAcl => "TX_MKDIR_ACL",
            Self::MkdirAttr => "TX_MKDIR_ATTR",
            Self::MkdirAclAttr => "TX_MKDIR_ACL_ATTR",
            Self::Write2 => "TX_WRITE2",
        }
    }

    /// Returns true for types that may be logged out of order.
    ///
    /// All of them carry the target object id directly after the common
    /// header.
    #[must_use]
    pub const fn is_ooo(self) -> bool {
        matches!(
            self,
            Self::Write | Self::Truncate | Self::Setattr | Self::AclV0 | Self::Acl | Self::Write2
        )
    }

    /// Returns true for the create family (plain and ACL variants).
    #[must_use]
    pub const fn is_create(self) -> bool {
        matches!(
            self,
            Self::Create
                | Self::Mkdir
                | Self::Mkxattr
                | Self::Symlink
                | Self::CreateAttr
                | Self::MkdirAttr
        ) || self.is_create_acl()
    }

    /// Returns true for creates that carry ACL data.
    #[must_use]
    pub const fn is_create_acl(self) -> bool {
        matches!(
            self,
            Self::CreateAcl | Self::CreateAclAttr | Self::MkdirAcl | Self::MkdirAclAttr
        )
    }

    /// Returns true for creates that carry an extended attribute section.
    #[must_use]
    pub const fn has_xvattr(self) -> bool {
        matches!(
            self,
            Self::CreateAttr | Self::MkdirAttr | Self::CreateAclAttr | Self::MkdirAclAttr
        )
    }

    /// Returns true for types whose names may be compared case-insensitively.
    #[must_use]
    pub const fn allows_ci(self) -> bool {
        matches!(
            self,
            Self::Mkdir | Self::Symlink | Self::Remove | Self::Rmdir | Self::Link | Self::Rename
        ) || self.is_create()
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
