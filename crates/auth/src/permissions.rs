use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (`area.action`, e.g. `"sales.create"`).
///
/// When used as a *grant*, a permission may contain wildcards:
/// - `"*"` grants everything,
/// - `"sales.*"` grants every action in an area,
/// - `"*.read"` grants one action in every area.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// Whether this grant covers `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        if self.is_wildcard() || self.as_str() == required.as_str() {
            return true;
        }
        let (Some((area, action)), Some((req_area, req_action))) =
            (self.as_str().split_once('.'), required.as_str().split_once('.'))
        else {
            return false;
        };
        (area == "*" || area == req_area) && (action == "*" || action == req_action)
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
