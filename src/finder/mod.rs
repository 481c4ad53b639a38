// SPDX-License-Identifier: Apache-2.0

mod ordering;

pub use ordering::{OrderingCriteria, SortRule};

use glob::{MatchOptions, Pattern, glob_with};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{Error, Result};
use ordering::Ranker;

// `*` must not cross directory boundaries, `**` may.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// FileFinder finds files matching include patterns while excluding others,
/// optionally keeping only the best-ranked matches.
#[derive(Debug, Clone)]
pub struct FileFinder {
    include: Vec<String>,
    exclude: Vec<Pattern>,
    ranker: Option<Ranker>,
}

impl FileFinder {
    /// Create a new FileFinder. All patterns, the ordering regex and every
    /// sort rule are validated here so that `find_files` never sees a bad
    /// configuration.
    pub fn new(
        include: Vec<String>,
        exclude: Vec<String>,
        ordering: Option<OrderingCriteria>,
    ) -> Result<Self> {
        for pattern in &include {
            Pattern::new(pattern)
                .map_err(|e| Error::InvalidGlob(format!("include '{}': {}", pattern, e)))?;
        }

        let exclude = exclude
            .iter()
            .map(|pattern| {
                Pattern::new(pattern)
                    .map_err(|e| Error::InvalidGlob(format!("exclude '{}': {}", pattern, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let ranker = match ordering {
            Some(criteria) if !criteria.is_empty() => Some(Ranker::new(&criteria)?),
            _ => None,
        };

        Ok(Self {
            include,
            exclude,
            ranker,
        })
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    /// Find all regular files matching the include patterns and none of the
    /// exclude patterns. Results are de-duplicated and sorted, then ranked
    /// when ordering criteria are configured.
    pub fn find_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches =
                glob_with(pattern, MATCH_OPTIONS).map_err(|e| Error::InvalidGlob(e.to_string()))?;

            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        debug!(pattern = %pattern, "Skipping unreadable path: {}", e);
                        continue;
                    }
                };

                // Skip directories
                if path.is_dir() {
                    continue;
                }

                if self.is_excluded(&path) {
                    continue;
                }

                // Add to result if not seen
                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        paths.sort();

        match &self.ranker {
            Some(ranker) => Ok(ranker.rank(paths)),
            None => Ok(paths),
        }
    }

    fn is_excluded(&self, path: &std::path::Path) -> bool {
        self.exclude
            .iter()
            .any(|pattern| pattern.matches_path_with(path, MATCH_OPTIONS))
    }
}
