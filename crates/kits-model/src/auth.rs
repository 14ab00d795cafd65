//! ---
//! dr_section: "01-core-functionality"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Kit topology and replication role data model."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Basic-auth credential for the broker management API.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    /// Management username.
    pub username: String,
    /// Management password. Never logged.
    pub password: String,
}

impl BasicAuth {
    /// Construct a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
