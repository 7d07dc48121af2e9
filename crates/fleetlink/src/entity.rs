//! Credential records for vehicles and dispatchers
//!
//! Records live in the external KV store; the relay reads them at attach
//! time, the admin plane writes them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A vehicle allowed to publish its streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: u32,
    /// bcrypt hash, base64-encoded.
    pub password_hash: String,
}

/// Scope of a dispatcher's subscription rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantsType {
    /// May subscribe to any vehicle.
    All,
    /// May subscribe only to vehicles in the grants set.
    List,
}

/// A dispatcher allowed to subscribe to vehicle streams.
///
/// Invariant: `grants_type == All` implies `grants` is empty; writes
/// normalize the set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatcher {
    pub id: u32,
    /// bcrypt hash, base64-encoded.
    pub password_hash: String,
    pub grants_type: GrantsType,
    pub grants: BTreeSet<u32>,
}

impl Dispatcher {
    /// Authorization check evaluated once at stream attach.
    pub fn may_observe(&self, vehicle_id: u32) -> bool {
        match self.grants_type {
            GrantsType::All => true,
            GrantsType::List => self.grants.contains(&vehicle_id),
        }
    }
}

/// Resolve a requested grant scope into its normalized stored form.
///
/// `All` discards any grants that came along; `List` requires a non-empty
/// set — a list dispatcher with nothing to watch is a provisioning mistake,
/// rejected the same way on add and on edit.
pub fn normalize_grants(
    grants_type: GrantsType,
    grants: Option<BTreeSet<u32>>,
) -> Result<BTreeSet<u32>, InvalidGrants> {
    match grants_type {
        GrantsType::All => Ok(BTreeSet::new()),
        GrantsType::List => match grants {
            Some(set) if !set.is_empty() => Ok(set),
            _ => Err(InvalidGrants),
        },
    }
}

/// `grants_type = list` with no vehicle ids.
#[derive(Debug, thiserror::Error)]
#[error("grants_type \"list\" requires a non-empty grants set")]
pub struct InvalidGrants;
