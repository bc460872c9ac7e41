// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// The identity of a single dEQP test case.
///
/// A dEQP test path such as `dEQP-GLES2.info.vendor` is split at its last dot into a class path
/// (`dEQP-GLES2.info`) and a leaf name (`vendor`).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TestId {
    class_name: String,
    test_name: String,
}

impl TestId {
    /// Creates a new identifier from a class path and a leaf name.
    pub fn new(class_name: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            test_name: test_name.into(),
        }
    }

    /// Parses a dotted test path.
    ///
    /// A path without any dots has an empty class path.
    pub fn from_path(path: &str) -> Self {
        match path.rsplit_once('.') {
            Some((class_name, test_name)) => Self::new(class_name, test_name),
            None => Self::new("", path),
        }
    }

    /// Returns the class path.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the leaf name.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Returns the dotted test path, as understood by the on-device executable.
    pub fn path(&self) -> String {
        if self.class_name.is_empty() {
            self.test_name.clone()
        } else {
            format!("{}.{}", self.class_name, self.test_name)
        }
    }
}

/// Displays the test as `class#leaf`, the form used by include and exclude filters.
impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class_name, self.test_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("dEQP-GLES2.info.vendor", "dEQP-GLES2.info", "vendor"; "nested path")]
    #[test_case("a.b", "a", "b"; "single dot")]
    #[test_case("lonely", "", "lonely"; "no dot")]
    fn from_path(path: &str, class_name: &str, test_name: &str) {
        let id = TestId::from_path(path);
        assert_eq!(id.class_name(), class_name);
        assert_eq!(id.test_name(), test_name);
        assert_eq!(id.path(), path, "path round-trips");
    }

    #[test]
    fn display_uses_hash_separator() {
        assert_eq!(TestId::from_path("a.b.c").to_string(), "a.b#c");
    }
}
