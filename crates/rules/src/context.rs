//! Evaluation trigger and caller identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which entry point the engine dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// First materialization of a record; no prior state.
    Init,
    /// Internally originated post against committed state.
    Merge,
    /// Externally requested write, carrying a [`CallerContext`].
    Request,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Init => write!(f, "init"),
            Trigger::Merge => write!(f, "merge"),
            Trigger::Request => write!(f, "request"),
        }
    }
}

/// Identity of whoever originated a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    /// Network peer, e.g. `"10.0.0.5:51234"`.
    pub peer: Option<String>,
    pub account: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl CallerContext {
    pub fn for_account(account: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            ..Self::default()
        }
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
