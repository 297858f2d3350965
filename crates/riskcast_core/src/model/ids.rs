//! Unique identifiers for simulation entities

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a Risk within a register/simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RiskId(pub u32);

impl fmt::Display for RiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
