// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{RunConfig, TestId, TestInstanceMap};
use crate::{errors::TestListReadError, test_filter::TestFilter};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

/// A loaded dEQP case list.
///
/// Case lists are plain text files with one dotted test path per line. Blank lines and lines
/// starting with `#` are ignored, and a line ending in `.txt` includes another case list, resolved
/// relative to the directory of the including file.
#[derive(Clone, Debug)]
pub struct TestCatalog {
    source: Utf8PathBuf,
    instances: TestInstanceMap,
}

impl TestCatalog {
    /// Loads a case list from disk, assigning `default_config` to every test.
    pub fn load(
        path: impl Into<Utf8PathBuf>,
        default_config: &RunConfig,
    ) -> Result<Self, TestListReadError> {
        let source = path.into();
        let mut instances = TestInstanceMap::new();
        let mut include_stack = Vec::new();
        read_case_list(&source, default_config, &mut include_stack, &mut instances)?;
        debug!(
            source = %source,
            tests = instances.len(),
            "loaded case list",
        );
        Ok(Self { source, instances })
    }

    /// Builds a catalog from an in-memory list of test paths.
    pub fn from_paths<'a>(
        source: impl Into<Utf8PathBuf>,
        paths: impl IntoIterator<Item = &'a str>,
        default_config: &RunConfig,
    ) -> Self {
        let mut instances = TestInstanceMap::new();
        for path in paths {
            instances.insert(TestId::from_path(path), [default_config.clone()]);
        }
        Self {
            source: source.into(),
            instances,
        }
    }

    /// Returns the path the catalog was loaded from.
    pub fn source(&self) -> &Utf8Path {
        &self.source
    }

    /// Returns the test instances in this catalog.
    pub fn instances(&self) -> &TestInstanceMap {
        &self.instances
    }

    /// Consumes the catalog, returning its test instances.
    pub fn into_instances(self) -> TestInstanceMap {
        self.instances
    }

    /// Drops every test that the filter doesn't accept.
    pub fn apply_filter(&mut self, filter: &TestFilter) {
        let before = self.instances.len();
        self.instances.retain(|test| filter.is_match(test));
        debug!(
            before,
            after = self.instances.len(),
            "applied test filter",
        );
    }
}

fn read_case_list(
    path: &Utf8Path,
    default_config: &RunConfig,
    include_stack: &mut Vec<Utf8PathBuf>,
    instances: &mut TestInstanceMap,
) -> Result<(), TestListReadError> {
    if include_stack.iter().any(|p| p == path) {
        return Err(TestListReadError::IncludeCycle {
            path: path.to_owned(),
        });
    }

    let contents = std::fs::read_to_string(path).map_err(|error| TestListReadError::Read {
        path: path.to_owned(),
        error,
    })?;

    include_stack.push(path.to_owned());
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.ends_with(".txt") {
            let include = match path.parent() {
                Some(parent) => parent.join(line),
                None => Utf8PathBuf::from(line),
            };
            read_case_list(&include, default_config, include_stack, instances)?;
        } else {
            instances.insert(TestId::from_path(line), [default_config.clone()]);
        }
    }
    include_stack.pop();

    Ok(())
}
