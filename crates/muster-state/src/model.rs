// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The owning model document.
//!
//! The core only needs two things from a model: its lifecycle value, and
//! an assert-only op that pins "the model is still Alive" into another
//! transaction's atomic set (migration creation uses it).

use muster_store::ops::{Assert, Op};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::collections;
use crate::life::Life;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ModelDoc {
    pub uuid: String,
    pub life: Life,
}

/// A read-only handle on a model document.
#[derive(Debug, Clone)]
pub struct Model {
    pub(crate) doc: ModelDoc,
}

impl Model {
    /// The model's UUID.
    pub fn uuid(&self) -> &str {
        &self.doc.uuid
    }

    /// The model's lifecycle value.
    pub fn life(&self) -> Life {
        self.doc.life
    }

    /// An assert-only op requiring the model to still be Alive at the
    /// instant some other op set commits.
    pub(crate) fn assert_alive_op(&self) -> Op {
        Op::assert_only(
            collections::MODELS,
            self.doc.uuid.clone(),
            Assert::fields([("life", json!("alive"))]),
        )
    }
}
