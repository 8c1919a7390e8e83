use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use serde::Serialize;
use tracing::{info, warn};

use crate::geo::ReferenceDataError;

/// Known item with the search tokens clients use for matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub tokens: Vec<String>,
}

/// Static list of known items, in file order.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    entries: Vec<CatalogEntry>,
}

impl ItemCatalog {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReferenceDataError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ReferenceDataError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_reader(BufReader::new(file))?;
        info!(
            stage = "reference",
            path = %path.display(),
            entries = catalog.entries.len(),
            "loaded item catalog"
        );
        Ok(catalog)
    }

    /// Parses `name:token,token,...` lines.
    pub fn from_reader(reader: impl BufRead) -> Result<Self, ReferenceDataError> {
        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for line in reader.lines() {
            let line = line.map_err(ReferenceDataError::Read)?;
            if line.trim().is_empty() {
                continue;
            }
            let Some((name, tokens)) = line.split_once(':') else {
                skipped += 1;
                continue;
            };
            entries.push(CatalogEntry {
                name: name.trim().to_string(),
                tokens: tokens
                    .split(',')
                    .map(str::trim)
                    .filter(|token| !token.is_empty())
                    .map(str::to_string)
                    .collect(),
            });
        }
        if skipped > 0 {
            warn!(stage = "reference", skipped, "skipped malformed item catalog rows");
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }
}
