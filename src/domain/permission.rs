use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
  Read,
  Write,
  List,
  Delete,
}

impl Permission {
  pub const ALL: [Permission; 4] = [
    Permission::Read,
    Permission::Write,
    Permission::List,
    Permission::Delete,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Permission::Read => "read",
      Permission::Write => "write",
      Permission::List => "list",
      Permission::Delete => "delete",
    }
  }
}

impl fmt::Display for Permission {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Permission {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "read" => Ok(Permission::Read),
      "write" => Ok(Permission::Write),
      "list" => Ok(Permission::List),
      "delete" => Ok(Permission::Delete),
      other => Err(format!("unknown permission '{}'", other)),
    }
  }
}

/// What a credential is declared to be allowed to do.
///
/// The declaration is independent of what the remote service enforces; the
/// harness exists to prove the two agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PermissionSet {
  pub read: bool,
  pub write: bool,
  pub list: bool,
  pub delete: bool,
}

impl PermissionSet {
  pub const fn none() -> Self {
    Self {
      read: false,
      write: false,
      list: false,
      delete: false,
    }
  }

  pub const fn all() -> Self {
    Self {
      read: true,
      write: true,
      list: true,
      delete: true,
    }
  }

  pub fn from_permissions<I>(permissions: I) -> Self
  where
    I: IntoIterator<Item = Permission>,
  {
    permissions
      .into_iter()
      .fold(Self::none(), |set, permission| set.with(permission))
  }

  pub const fn with(mut self, permission: Permission) -> Self {
    match permission {
      Permission::Read => self.read = true,
      Permission::Write => self.write = true,
      Permission::List => self.list = true,
      Permission::Delete => self.delete = true,
    }
    self
  }

  pub const fn allows(&self, permission: Permission) -> bool {
    match permission {
      Permission::Read => self.read,
      Permission::Write => self.write,
      Permission::List => self.list,
      Permission::Delete => self.delete,
    }
  }

  /// True when every permission in `required` is granted here.
  pub fn contains(&self, required: &PermissionSet) -> bool {
    required.iter().all(|permission| self.allows(permission))
  }

  /// Required permissions that this set does not grant.
  pub fn missing(&self, required: &PermissionSet) -> Vec<Permission> {
    required
      .iter()
      .filter(|permission| !self.allows(*permission))
      .collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
    Permission::ALL
      .into_iter()
      .filter(move |permission| self.allows(*permission))
  }

  pub fn is_empty(&self) -> bool {
    self.iter().next().is_none()
  }

  pub fn is_full(&self) -> bool {
    *self == Self::all()
  }

  /// Every subset of {read, write, list, delete}, from no permissions to all four.
  pub fn combinations() -> Vec<PermissionSet> {
    (0u8..16)
      .map(|bits| PermissionSet {
        read: bits & 0b0001 != 0,
        write: bits & 0b0010 != 0,
        list: bits & 0b0100 != 0,
        delete: bits & 0b1000 != 0,
      })
      .collect()
  }

  /// Upper-case label such as `READ_WRITE`, `WRITE_DELETE`, `NONE` or `ALL`.
  pub fn label(&self) -> String {
    if self.is_empty() {
      return "NONE".to_string();
    }
    if self.is_full() {
      return "ALL".to_string();
    }
    self
      .iter()
      .map(|permission| permission.as_str().to_ascii_uppercase())
      .collect::<Vec<_>>()
      .join("_")
  }
}

impl fmt::Display for PermissionSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.label())
  }
}

impl FromIterator<Permission> for PermissionSet {
  fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
    Self::from_permissions(iter)
  }
}

/// Named access tier of a bucket/credential pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionTier {
  Public,
  Private,
  Limited(PermissionSet),
}

impl PermissionTier {
  pub fn permissions(&self) -> PermissionSet {
    match self {
      PermissionTier::Public | PermissionTier::Private => PermissionSet::all(),
      PermissionTier::Limited(set) => *set,
    }
  }

  pub fn label(&self) -> String {
    match self {
      PermissionTier::Public => "PUBLIC".to_string(),
      PermissionTier::Private => "PRIVATE".to_string(),
      PermissionTier::Limited(set) => set.label(),
    }
  }
}
