// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Include and exclude filters for test cases.
//!
//! A filter entry is either an exact test path or a glob. Exact paths are written in dotted form
//! (`dEQP-GLES2.info.vendor`) or in `class#leaf` form (`dEQP-GLES2.info#vendor`). Globs contain at
//! least one `*`, which matches any run of characters; every other character is literal. Globs are
//! matched against the whole `class#leaf` form of a test.
//!
//! Exclusion always wins. If there are no include entries, every test that isn't excluded is
//! included.

use crate::{
    errors::{FilterReadError, TestFilterBuildError},
    list::TestId,
};
use camino::Utf8Path;
use regex::Regex;
use std::collections::HashSet;

/// Builder for a [`TestFilter`].
#[derive(Clone, Debug, Default)]
pub struct TestFilterBuilder {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl TestFilterBuilder {
    /// Creates a new builder with no entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an include entry.
    pub fn include(&mut self, entry: impl Into<String>) -> &mut Self {
        self.includes.push(entry.into());
        self
    }

    /// Adds an exclude entry.
    pub fn exclude(&mut self, entry: impl Into<String>) -> &mut Self {
        self.excludes.push(entry.into());
        self
    }

    /// Adds one include entry per line of the given file.
    pub fn include_file(&mut self, path: &Utf8Path) -> Result<&mut Self, FilterReadError> {
        let entries = read_filter_file(path)?;
        self.includes.extend(entries);
        Ok(self)
    }

    /// Adds one exclude entry per line of the given file.
    pub fn exclude_file(&mut self, path: &Utf8Path) -> Result<&mut Self, FilterReadError> {
        let entries = read_filter_file(path)?;
        self.excludes.extend(entries);
        Ok(self)
    }

    /// Compiles the filter.
    pub fn build(&self) -> Result<TestFilter, TestFilterBuildError> {
        let include = FilterSet::new(&self.includes)?;
        let exclude = FilterSet::new(&self.excludes)?;
        Ok(TestFilter { include, exclude })
    }
}

/// A compiled include/exclude filter.
#[derive(Clone, Debug)]
pub struct TestFilter {
    include: FilterSet,
    exclude: FilterSet,
}

impl TestFilter {
    /// Returns a filter that accepts every test.
    pub fn any() -> Self {
        Self {
            include: FilterSet::default(),
            exclude: FilterSet::default(),
        }
    }

    /// Returns true if the test passes the filter.
    pub fn is_match(&self, test: &TestId) -> bool {
        let name = test.to_string();
        if self.exclude.is_match(&name) {
            return false;
        }
        self.include.is_empty() || self.include.is_match(&name)
    }
}

#[derive(Clone, Debug, Default)]
struct FilterSet {
    exact: HashSet<String>,
    patterns: Vec<Regex>,
}

impl FilterSet {
    fn new(entries: &[String]) -> Result<Self, TestFilterBuildError> {
        let mut set = Self::default();
        for entry in entries {
            let entry = entry.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            if entry.contains('*') {
                let regex = glob_to_regex(entry)
                    .map_err(|error| TestFilterBuildError::new(entry, error))?;
                set.patterns.push(regex);
            } else {
                set.exact.insert(normalize_exact(entry));
            }
        }
        Ok(set)
    }

    fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }

    fn is_match(&self, name: &str) -> bool {
        self.exact.contains(name) || self.patterns.iter().any(|re| re.is_match(name))
    }
}

/// Rewrites the last `.` of a dotted path to `#`, unless the entry is already in `class#leaf`
/// form.
fn normalize_exact(entry: &str) -> String {
    if entry.contains('#') {
        return entry.to_owned();
    }
    match entry.rsplit_once('.') {
        Some((class_name, test_name)) => format!("{class_name}#{test_name}"),
        None => entry.to_owned(),
    }
}

fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let body = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
}

fn read_filter_file(path: &Utf8Path) -> Result<Vec<String>, FilterReadError> {
    let contents =
        std::fs::read_to_string(path).map_err(|error| FilterReadError::new(path, error))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}
