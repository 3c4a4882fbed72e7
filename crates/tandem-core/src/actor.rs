//! The party acting on a record.
//!
//! An [`Actor`] is passed explicitly through every write that needs to know
//! who is filing. Whether the actor is *allowed* to file is decided outside
//! this crate.

use serde::{Deserialize, Serialize};

/// In what capacity the actor files a half of the declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Representation {
  /// The employee files their own half.
  Employee,
  /// The employer files directly.
  Employer,
  /// An agent files on behalf of an employer.
  Representative {
    /// Identifier of the organisation being represented.
    on_behalf_of: String,
  },
}

impl Representation {
  /// Human-readable label used in notifications.
  pub fn describe(&self) -> String {
    match self {
      Self::Employee => "the employee".to_owned(),
      Self::Employer => "the employer".to_owned(),
      Self::Representative { on_behalf_of } => {
        format!("a representative of {on_behalf_of}")
      }
    }
  }
}

/// Who performed an action, and in which capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
  pub user_id:        String,
  pub representation: Representation,
}

impl Actor {
  pub fn new(user_id: impl Into<String>, representation: Representation) -> Self {
    Self { user_id: user_id.into(), representation }
  }
}
