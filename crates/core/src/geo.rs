use std::{
    collections::HashMap,
    f64::consts::PI,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use thiserror::Error;
use tracing::{info, warn};

use crate::types::Coordinate;

const ZIP_COLUMN: usize = 1;
const LATITUDE_COLUMN: usize = 9;
const LONGITUDE_COLUMN: usize = 10;

/// Statute miles per nautical mile.
const MILES_PER_NAUTICAL_MILE: f64 = 1.1515;
const NAUTICAL_MILES_PER_DEGREE: f64 = 60.0;

/// Great-circle distance in statute miles using the spherical law of cosines.
///
/// The cosine term is clamped to 1.0 so nearly identical points yield 0
/// instead of NaN.
pub fn distance_miles(a: Coordinate, b: Coordinate) -> f64 {
    let rad_lat1 = PI * a.latitude / 180.0;
    let rad_lat2 = PI * b.latitude / 180.0;
    let rad_theta = PI * (a.longitude - b.longitude) / 180.0;

    let cosine =
        rad_lat1.sin() * rad_lat2.sin() + rad_lat1.cos() * rad_lat2.cos() * rad_theta.cos();
    let angle = cosine.min(1.0).acos();

    angle * 180.0 / PI * NAUTICAL_MILES_PER_DEGREE * MILES_PER_NAUTICAL_MILE
}

/// Immutable postal code to coordinate lookup, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct CoordinateTable {
    entries: HashMap<String, Coordinate>,
}

impl CoordinateTable {
    /// Builds a table from in-memory entries.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Coordinate)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(zip, coordinate)| (zip.into(), coordinate))
                .collect(),
        }
    }

    /// Loads tab-separated postal reference data from `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReferenceDataError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ReferenceDataError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_reader(BufReader::new(file))?;
        info!(
            stage = "reference",
            path = %path.display(),
            entries = table.len(),
            "loaded postal code coordinates"
        );
        Ok(table)
    }

    /// Parses postal reference data.
    ///
    /// Column 1 holds the postal code, columns 9 and 10 latitude and
    /// longitude. Rows that are too short or carry unparsable coordinates
    /// are skipped.
    pub fn from_reader(reader: impl BufRead) -> Result<Self, ReferenceDataError> {
        let mut entries = HashMap::new();
        let mut skipped = 0usize;

        for line in reader.lines() {
            let line = line.map_err(ReferenceDataError::Read)?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_row(&line) {
                Some((zip, coordinate)) => {
                    entries.insert(zip, coordinate);
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(stage = "reference", skipped, "skipped malformed postal code rows");
        }

        Ok(Self { entries })
    }

    pub fn get(&self, zip_code: &str) -> Option<Coordinate> {
        self.entries.get(zip_code).copied()
    }

    /// Resolves a postal code, falling back to `(0, 0)` when it is unknown.
    pub fn resolve(&self, zip_code: &str) -> Resolved {
        match self.get(zip_code) {
            Some(coordinate) => Resolved::Known(coordinate),
            None => Resolved::Fallback(Coordinate::origin()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of resolving a postal code against the table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved {
    Known(Coordinate),
    Fallback(Coordinate),
}

impl Resolved {
    pub fn coordinate(self) -> Coordinate {
        match self {
            Self::Known(coordinate) | Self::Fallback(coordinate) => coordinate,
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

fn parse_row(line: &str) -> Option<(String, Coordinate)> {
    let columns: Vec<&str> = line.split('\t').collect();
    if columns.len() <= LONGITUDE_COLUMN {
        return None;
    }
    let zip = columns[ZIP_COLUMN].trim();
    if zip.is_empty() {
        return None;
    }
    let latitude = columns[LATITUDE_COLUMN].trim().parse::<f64>().ok()?;
    let longitude = columns[LONGITUDE_COLUMN].trim().parse::<f64>().ok()?;
    Some((zip.to_string(), Coordinate::new(latitude, longitude)))
}

/// Errors raised while loading reference data files.
#[derive(Debug, Error)]
pub enum ReferenceDataError {
    #[error("failed to open reference data {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read reference data: {0}")]
    Read(std::io::Error),
}
