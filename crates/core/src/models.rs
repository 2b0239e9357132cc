//! Domain model types exchanged with the server and the workspace store.
//!
//! These are the boundary types: the transport layer fills them in, the
//! engine components read them, and the local store persists some of them.
//! Integer codes and bit values match the server's legacy encodings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wire enumerations
// ---------------------------------------------------------------------------

/// Returns true when no code appears twice. Evaluated in a `const` item for
/// every wire table, so a duplicated code fails the build.
const fn codes_are_unique(codes: &[i32]) -> bool {
    let mut i = 0;
    while i < codes.len() {
        let mut j = i + 1;
        while j < codes.len() {
            if codes[i] == codes[j] {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

/// Declares a closed enumeration together with its integer wire table.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $code:literal => $text:literal,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
        }

        impl $name {
            /// Every integer code, in declaration order.
            pub const WIRE_CODES: &'static [i32] = &[$($code),+];

            /// Integer code sent to and received from the server.
            pub fn to_wire(self) -> i32 {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            /// Decode a server integer code. Unknown codes yield `None`.
            pub fn from_wire(code: i32) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        const _: () = assert!(
            codes_are_unique($name::WIRE_CODES),
            concat!("duplicate wire code in ", stringify!($name))
        );

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $text),)+
                }
            }
        }
    };
}

wire_enum! {
    /// The operation during which a conflict was raised.
    pub enum ConflictType {
        Get = 1 => "get",
        Checkin = 2 => "checkin",
        Local = 3 => "local",
        Merge = 4 => "merge",
    }
}

wire_enum! {
    /// How a conflict was (or will be) resolved.
    pub enum Resolution {
        None = 0 => "none",
        AcceptMerge = 1 => "accept_merge",
        AcceptYours = 2 => "accept_yours",
        AcceptTheirs = 3 => "accept_theirs",
        DeleteConflict = 4 => "delete_conflict",
        AcceptYoursRenameTheirs = 5 => "accept_yours_rename_theirs",
        OverwriteLocal = 6 => "overwrite_local",
    }
}

wire_enum! {
    /// Severity of a failure reported back to the caller.
    pub enum SeverityType {
        Error = 1 => "error",
        Warning = 2 => "warning",
    }
}

wire_enum! {
    /// Kind of a version-controlled item.
    pub enum ItemType {
        Any = 0 => "any",
        Folder = 1 => "folder",
        File = 2 => "file",
    }
}

wire_enum! {
    /// Recursion depth of an item specification.
    pub enum RecursionType {
        None = 0 => "none",
        OneLevel = 1 => "one_level",
        Full = 2 => "full",
    }
}

// ---------------------------------------------------------------------------
// Bit-flag sets
// ---------------------------------------------------------------------------

/// Serializes a `bitflags` type as its raw integer bits and rejects unknown
/// bits on the way back in.
macro_rules! bits_serde {
    ($name:ident) => {
        impl ::serde::Serialize for $name {
            fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                ::serde::Serialize::serialize(&self.bits(), serializer)
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D: ::serde::Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Self, D::Error> {
                let bits = <u32 as ::serde::Deserialize>::deserialize(deserializer)?;
                Self::from_bits(bits).ok_or_else(|| {
                    <D::Error as ::serde::de::Error>::custom(format!(
                        concat!("invalid ", stringify!($name), " bits: {:#x}"),
                        bits
                    ))
                })
            }
        }
    };
}

pub(crate) use bits_serde;

bitflags::bitflags! {
    /// The kinds of change carried by a pending or committed change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChangeType: u32 {
        const NONE = 1;
        const ADD = 2;
        const EDIT = 4;
        const ENCODING = 8;
        const RENAME = 16;
        const DELETE = 32;
        const UNDELETE = 64;
        const BRANCH = 128;
        const MERGE = 256;
        const LOCK = 512;
        const ROLLBACK = 1024;
        const SOURCE_RENAME = 2048;
        const PROPERTY = 8192;
    }
}

bits_serde!(ChangeType);

impl Default for ChangeType {
    fn default() -> Self {
        Self::NONE
    }
}

impl ChangeType {
    /// Bits that alter file content.
    pub const CONTENT: Self = Self::EDIT.union(Self::BRANCH);

    /// The bits a check-in actually commits; locks are never committed.
    pub fn committable(self) -> Self {
        self.difference(Self::LOCK).difference(Self::NONE)
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Fold a server or local path for case-insensitive comparison.
pub fn fold_path(path: &str) -> String {
    path.to_lowercase()
}

/// Case-insensitive path equality.
pub fn paths_equal(a: &str, b: &str) -> bool {
    a == b || fold_path(a) == fold_path(b)
}

// ---------------------------------------------------------------------------
// Server items and changes
// ---------------------------------------------------------------------------

/// A server item description as returned by item queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub server_item: String,
    pub item_id: i32,
    /// Changeset in which this version of the item was committed.
    pub changeset_id: i32,
    #[serde(default = "default_item_type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub encoding: i32,
    #[serde(default)]
    pub content_length: i64,
    #[serde(default)]
    pub content_hash: Option<Vec<u8>>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub checkin_date: Option<DateTime<Utc>>,
    /// Non-zero when this version of the item is deleted.
    #[serde(default)]
    pub deletion_id: i32,
}

fn default_item_type() -> ItemType {
    ItemType::File
}

impl Item {
    /// Create a file item with no content metadata.
    pub fn new(server_item: impl Into<String>, item_id: i32, changeset_id: i32) -> Self {
        Self {
            server_item: server_item.into(),
            item_id,
            changeset_id,
            item_type: ItemType::File,
            encoding: 0,
            content_length: 0,
            content_hash: None,
            download_url: None,
            checkin_date: None,
            deletion_id: 0,
        }
    }
}

/// A change that has not been checked in yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub server_item: String,
    #[serde(default)]
    pub source_server_item: Option<String>,
    #[serde(default)]
    pub local_item: Option<String>,
    #[serde(default)]
    pub item_id: i32,
    /// Workspace version the change was pended against (0 for adds).
    #[serde(default)]
    pub version: i32,
    pub change_type: ChangeType,
    #[serde(default)]
    pub encoding: i32,
    /// Hash of the content uploaded for this change, if any.
    #[serde(default)]
    pub upload_hash: Option<Vec<u8>>,
    /// Uncompressed length of the uploaded content, -1 when unknown.
    #[serde(default = "unknown_length")]
    pub length: i64,
}

fn unknown_length() -> i64 {
    -1
}

impl PendingChange {
    /// Create a pending change with no content metadata.
    pub fn new(server_item: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            server_item: server_item.into(),
            source_server_item: None,
            local_item: None,
            item_id: 0,
            version: 0,
            change_type,
            encoding: 0,
            upload_hash: None,
            length: unknown_length(),
        }
    }
}

/// One committed change inside a changeset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub item: Item,
    pub change_type: ChangeType,
}

/// A committed changeset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub changeset_id: i32,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Lifecycle of a conflict within one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictState {
    #[default]
    Unresolved,
    Resolved,
    Errored,
}

impl std::fmt::Display for ConflictState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unresolved => write!(f, "unresolved"),
            Self::Resolved => write!(f, "resolved"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// A conflict between the workspace ("yours") and the server ("theirs").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_id: i32,
    pub conflict_type: ConflictType,
    #[serde(default)]
    pub item_id: i32,

    pub your_server_item: String,
    #[serde(default)]
    pub your_change_type: ChangeType,
    #[serde(default)]
    pub your_encoding: i32,
    #[serde(default)]
    pub your_hash: Option<Vec<u8>>,

    pub their_server_item: String,
    #[serde(default)]
    pub their_change_type: ChangeType,
    #[serde(default)]
    pub their_encoding: i32,
    #[serde(default)]
    pub their_hash: Option<Vec<u8>>,
    /// Server version to fetch after resolution; 0 when the item is gone.
    #[serde(default)]
    pub their_version: i32,

    #[serde(default)]
    pub source_local_item: Option<String>,
    #[serde(default)]
    pub target_local_item: Option<String>,

    #[serde(default = "default_resolution")]
    pub resolution: Resolution,
    #[serde(default)]
    pub state: ConflictState,
}

fn default_resolution() -> Resolution {
    Resolution::None
}

impl Conflict {
    /// Create an unresolved conflict where both sides refer to `server_item`.
    pub fn new(conflict_id: i32, conflict_type: ConflictType, server_item: &str) -> Self {
        Self {
            conflict_id,
            conflict_type,
            item_id: 0,
            your_server_item: server_item.to_string(),
            your_change_type: ChangeType::NONE,
            your_encoding: 0,
            your_hash: None,
            their_server_item: server_item.to_string(),
            their_change_type: ChangeType::NONE,
            their_encoding: 0,
            their_hash: None,
            their_version: 0,
            source_local_item: None,
            target_local_item: None,
            resolution: Resolution::None,
            state: ConflictState::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state == ConflictState::Resolved
    }
}

// ---------------------------------------------------------------------------
// Get requests
// ---------------------------------------------------------------------------

/// Version selector for a get request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSpec {
    Latest,
    Changeset(i32),
}

impl std::fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "T"),
            Self::Changeset(id) => write!(f, "C{}", id),
        }
    }
}

/// A follow-up fetch to bring one local path to a given version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    pub item: String,
    pub recursion: RecursionType,
    pub version: VersionSpec,
}
