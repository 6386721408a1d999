//! Matching file mappings against a built source tree.

use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use walkdir::WalkDir;

use super::StageError;
use crate::descriptor::FileMapping;

/// A mapping together with the source paths it selected (relative to the source root).
#[derive(Debug)]
pub(crate) struct MatchedMapping<'a> {
  pub mapping: &'a FileMapping,
  pub matches: Vec<PathBuf>,
}

/// Resolve every mapping up front so nothing is written unless all of them match.
pub(crate) fn match_all<'a>(source_root: &Path, mappings: &'a [FileMapping]) -> Result<Vec<MatchedMapping<'a>>, StageError> {
  mappings
    .iter()
    .map(|mapping| {
      let matches = match_pattern(source_root, &mapping.pattern)?;
      if matches.is_empty() {
        return Err(StageError::NoMatch {
          pattern: mapping.pattern.clone(),
        });
      }
      if mapping.rename.is_some() && matches.len() > 1 {
        return Err(StageError::AmbiguousRename {
          pattern: mapping.pattern.clone(),
          count: matches.len(),
        });
      }
      Ok(MatchedMapping { mapping, matches })
    })
    .collect()
}

/// Paths under `source_root` matching `pattern`, sorted.
///
/// `*` does not cross `/`. A matched directory is returned once and its
/// contents are not matched separately.
pub(crate) fn match_pattern(source_root: &Path, pattern: &str) -> Result<Vec<PathBuf>, StageError> {
  let matcher = GlobBuilder::new(pattern)
    .literal_separator(true)
    .build()
    .map_err(|e| StageError::InvalidPattern {
      pattern: pattern.to_string(),
      message: e.to_string(),
    })?
    .compile_matcher();

  let mut matches = Vec::new();
  let mut walker = WalkDir::new(source_root).min_depth(1).sort_by_file_name().into_iter();

  while let Some(entry) = walker.next() {
    let entry = entry.map_err(|e| StageError::StageIncomplete {
      mapping: pattern.to_string(),
      reason: e.to_string(),
    })?;
    let Ok(rel) = entry.path().strip_prefix(source_root) else {
      continue;
    };

    if matcher.is_match(rel) {
      matches.push(rel.to_path_buf());
      if entry.file_type().is_dir() {
        walker.skip_current_dir();
      }
    }
  }

  Ok(matches)
}
