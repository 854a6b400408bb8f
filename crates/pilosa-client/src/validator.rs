// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier checks matching the server's accepted charset.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{PilosaError, Result};

/// Longest accepted name, label, or key.
pub const MAX_IDENTIFIER_LEN: usize = 64;

static NAME: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[a-z][a-z0-9_-]*$"));
static LABEL: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[a-zA-Z][a-zA-Z0-9_-]*$"));
static KEY: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[A-Za-z0-9_{}+/=.~%:-]*$"));

#[allow(clippy::expect_used)]
pub(crate) fn static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in pattern compiles")
}

fn check(re: &Regex, kind: &'static str, value: &str) -> Result<()> {
    if value.len() <= MAX_IDENTIFIER_LEN && re.is_match(value) {
        Ok(())
    } else {
        Err(PilosaError::InvalidIdentifier {
            kind,
            value: value.to_owned(),
        })
    }
}

/// Index names: lowercase letter first, then lowercase letters, digits, `_`, `-`.
pub fn validate_index_name(name: &str) -> Result<()> {
    check(&NAME, "index name", name)
}

/// Field names follow the index name rules.
pub fn validate_field_name(name: &str) -> Result<()> {
    check(&NAME, "field name", name)
}

/// Row and column attribute labels; mixed case allowed.
pub fn validate_label(label: &str) -> Result<()> {
    check(&LABEL, "label", label)
}

/// String keys for keyed rows and columns.
pub fn validate_key(key: &str) -> Result<()> {
    check(&KEY, "key", key)
}
