//! Deciding what a caller identity may do.

use std::collections::HashMap;

use serde::Deserialize;

//------------ UserRights ----------------------------------------------------

/// The rights of one caller identity, as configured.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct UserRights {
    #[serde(default)]
    pub can_sign: bool,

    /// Bind this identity to the HSM backend when its token does not
    /// name a method explicitly.
    #[serde(default)]
    pub use_hsm: bool,
}

//------------ Authorizer ----------------------------------------------------

/// Authorization lookups against the configured user table.
///
/// Unknown identities have no rights at all. Certificate retrieval is
/// not a right; the router allows it for everyone.
#[derive(Clone, Debug)]
pub struct Authorizer {
    users: HashMap<String, UserRights>,
}

impl Authorizer {
    pub fn new(users: HashMap<String, UserRights>) -> Self {
        Authorizer { users }
    }

    pub fn is_authorized_to_sign(&self, id: &str) -> bool {
        self.users.get(id).map(|user| user.can_sign).unwrap_or(false)
    }

    pub fn uses_hsm_backend(&self, id: &str) -> bool {
        self.users.get(id).map(|user| user.use_hsm).unwrap_or(false)
    }
}

//------------ Tests ---------------------------------------------------------
