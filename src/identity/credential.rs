use serde::{Deserialize, Serialize};

/// Capability codes carried by credentials and session tokens.
/// The wire and store representation is the plain integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessRight {
    Create,
    Read,
    Update,
    Delete,
}

impl AccessRight {
    pub fn code(self) -> i32 {
        match self {
            AccessRight::Create => 0,
            AccessRight::Read => 1,
            AccessRight::Update => 2,
            AccessRight::Delete => 3,
        }
    }
}

/// Login request body: username plus verbatim password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
}

/// A stored credential. Passwords are opaque and compared verbatim;
/// hashing policy is out of scope for this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
    #[serde(rename = "accessRights")]
    pub access_rights: Vec<i32>,
}
