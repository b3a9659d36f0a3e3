// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The ordered entity lifecycle value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle stage of a managed entity.
///
/// Totally ordered: Alive < Dying < Dead. A persisted life value never
/// decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    /// The entity is operating normally.
    Alive,
    /// The entity is being torn down; dependents should detach.
    Dying,
    /// The entity is finished; only removal remains.
    Dead,
}

impl Life {
    /// Whether this is the Alive stage.
    pub fn is_alive(self) -> bool {
        self == Life::Alive
    }

    /// Whether this is the Dead stage.
    pub fn is_dead(self) -> bool {
        self == Life::Dead
    }
}

impl fmt::Display for Life {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Life::Alive => "alive",
            Life::Dying => "dying",
            Life::Dead => "dead",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Life::Alive < Life::Dying);
        assert!(Life::Dying < Life::Dead);
        assert_eq!(Life::Dying.max(Life::Dead), Life::Dead);
    }

    #[test]
    fn test_serde_round_trip() {
        for (life, text) in [
            (Life::Alive, "\"alive\""),
            (Life::Dying, "\"dying\""),
            (Life::Dead, "\"dead\""),
        ] {
            assert_eq!(serde_json::to_string(&life).unwrap(), text);
            assert_eq!(serde_json::from_str::<Life>(text).unwrap(), life);
        }
    }
}
