// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! RINA application names.
//!
//! A [`Name`] is the four-tuple (APN, API, AEN, AEI) used throughout the
//! DIF to identify application processes and entities. Equality is
//! componentwise; the canonical string form is used as a RIB/DFT mapping
//! key and joins the components with `/`, matching the convention shim-udp4
//! maps onto DNS labels (`/` → `.`).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Name {
    pub apn: String,
    pub api: String,
    pub aen: String,
    pub aei: String,
}

impl Name {
    pub fn new(apn: impl Into<String>) -> Self {
        Self {
            apn: apn.into(),
            api: String::new(),
            aen: String::new(),
            aei: String::new(),
        }
    }

    pub fn with_instance(apn: impl Into<String>, api: impl Into<String>) -> Self {
        Self {
            apn: apn.into(),
            api: api.into(),
            aen: String::new(),
            aei: String::new(),
        }
    }

    pub fn full(
        apn: impl Into<String>,
        api: impl Into<String>,
        aen: impl Into<String>,
        aei: impl Into<String>,
    ) -> Self {
        Self {
            apn: apn.into(),
            api: api.into(),
            aen: aen.into(),
            aei: aei.into(),
        }
    }

    /// Canonical string key: components joined by `/`, trailing empty
    /// components omitted.
    pub fn canonical(&self) -> String {
        let mut parts = vec![self.apn.as_str()];
        for part in [&self.api, &self.aen, &self.aei] {
            if !part.is_empty() {
                parts.push(part.as_str());
            }
        }
        parts.join("/")
    }

    /// Maps this name onto a DNS hostname for shim-udp4 resolution:
    /// `/` separators become `.`.
    pub fn to_hostname(&self) -> String {
        self.canonical().replace('/', ".")
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        let mut parts = s.split('/');
        Self {
            apn: parts.next().unwrap_or_default().to_string(),
            api: parts.next().unwrap_or_default().to_string(),
            aen: parts.next().unwrap_or_default().to_string(),
            aei: parts.next().unwrap_or_default().to_string(),
        }
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Name::from(s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_joins_nonempty_components() {
        let n = Name::with_instance("foo", "1");
        assert_eq!(n.canonical(), "foo/1");
        assert_eq!(Name::new("bare").canonical(), "bare");
    }

    #[test]
    fn componentwise_equality() {
        let a = Name::with_instance("foo", "1");
        let b = Name::full("foo", "1", "", "");
        assert_eq!(a, b);
    }

    #[test]
    fn hostname_mapping_swaps_separator() {
        let n = Name::with_instance("foo", "1");
        assert_eq!(n.to_hostname(), "foo.1");
    }

    #[test]
    fn round_trips_through_canonical_string() {
        let n = Name::full("foo", "1", "mgmt", "2");
        let parsed = Name::from(n.canonical());
        assert_eq!(parsed, n);
    }
}
