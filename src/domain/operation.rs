use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::permission::{Permission, PermissionSet};

/// Storage operation exercised by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
  Upload,
  LargeUpload,
  CreateFolder,
  Overwrite,
  Download,
  GetInfo,
  GetMetadata,
  GetContent,
  List,
  CheckFolderExists,
  DeleteObject,
  DeleteFolder,
  Move,
  CleanBucket,
}

impl Operation {
  pub const ALL: [Operation; 14] = [
    Operation::Upload,
    Operation::LargeUpload,
    Operation::CreateFolder,
    Operation::Overwrite,
    Operation::Download,
    Operation::GetInfo,
    Operation::GetMetadata,
    Operation::GetContent,
    Operation::List,
    Operation::CheckFolderExists,
    Operation::DeleteObject,
    Operation::DeleteFolder,
    Operation::Move,
    Operation::CleanBucket,
  ];

  /// Permissions the operation semantically requires.
  pub fn required(&self) -> PermissionSet {
    let none = PermissionSet::none();
    match self {
      Operation::Upload
      | Operation::LargeUpload
      | Operation::CreateFolder
      | Operation::Overwrite => none.with(Permission::Write),
      Operation::Download
      | Operation::GetInfo
      | Operation::GetMetadata
      | Operation::GetContent => none.with(Permission::Read),
      Operation::List | Operation::CheckFolderExists => none.with(Permission::List),
      Operation::DeleteObject => none.with(Permission::Delete),
      // folder contents have to be enumerated before anything is deleted
      Operation::DeleteFolder | Operation::CleanBucket => {
        none.with(Permission::Delete).with(Permission::List)
      },
      Operation::Move => none.with(Permission::Write).with(Permission::Delete),
    }
  }

  /// Whether a successful call changes remote state.
  pub fn is_mutating(&self) -> bool {
    matches!(
      self,
      Operation::Upload
        | Operation::LargeUpload
        | Operation::CreateFolder
        | Operation::Overwrite
        | Operation::DeleteObject
        | Operation::DeleteFolder
        | Operation::Move
        | Operation::CleanBucket
    )
  }

  /// Stable identifier used in test ids and suite files.
  pub fn slug(&self) -> &'static str {
    match self {
      Operation::Upload => "upload",
      Operation::LargeUpload => "largeUpload",
      Operation::CreateFolder => "createFolder",
      Operation::Overwrite => "overwrite",
      Operation::Download => "download",
      Operation::GetInfo => "getInfo",
      Operation::GetMetadata => "getMetadata",
      Operation::GetContent => "getContent",
      Operation::List => "list",
      Operation::CheckFolderExists => "checkFolderExists",
      Operation::DeleteObject => "deleteObject",
      Operation::DeleteFolder => "deleteFolder",
      Operation::Move => "move",
      Operation::CleanBucket => "cleanBucket",
    }
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Operation::Upload => "Upload",
      Operation::LargeUpload => "Large upload",
      Operation::CreateFolder => "Create folder",
      Operation::Overwrite => "Overwrite",
      Operation::Download => "Download",
      Operation::GetInfo => "Get info",
      Operation::GetMetadata => "Get metadata",
      Operation::GetContent => "Get content",
      Operation::List => "List",
      Operation::CheckFolderExists => "Check folder exists",
      Operation::DeleteObject => "Delete",
      Operation::DeleteFolder => "Delete folder",
      Operation::Move => "Move",
      Operation::CleanBucket => "Clean bucket",
    };
    f.write_str(name)
  }
}

impl FromStr for Operation {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.trim();
    Operation::ALL
      .into_iter()
      .find(|op| op.slug().eq_ignore_ascii_case(wanted))
      .ok_or_else(|| format!("unknown operation '{}'", wanted))
  }
}
