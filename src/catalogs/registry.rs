//! Known static reference catalogs and their VizieR location.
use std::fmt;

use crate::constants::{DEFAULT_COL_DEC, DEFAULT_COL_RA};

/// Where and how to query one static catalog.
///
/// # Fields
///
/// * `key` - Short lookup name (`"ps1"`, `"gaiadr3"`, ...)
/// * `name` - Human readable name, used in log messages
/// * `vizier` - VizieR table identifier
/// * `ra_column`, `dec_column` - Position columns of the table, degrees
/// * `columns` - Further columns returned with the positions (identifiers, magnitudes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDescriptor {
    pub key: String,
    pub name: String,
    pub vizier: String,
    pub ra_column: String,
    pub dec_column: String,
    pub columns: Vec<String>,
}

impl CatalogDescriptor {
    /// Descriptor of a VizieR table using the `RAJ2000`/`DEJ2000` columns.
    pub fn new(key: &str, name: &str, vizier: &str) -> Self {
        CatalogDescriptor {
            key: key.to_string(),
            name: name.to_string(),
            vizier: vizier.to_string(),
            ra_column: DEFAULT_COL_RA.to_string(),
            dec_column: DEFAULT_COL_DEC.to_string(),
            columns: vec![],
        }
    }

    pub fn with_position_columns(mut self, ra: &str, dec: &str) -> Self {
        self.ra_column = ra.to_string();
        self.dec_column = dec.to_string();
        self
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Columns requested from the service: the positions, then the extra columns.
    pub fn selected_columns(&self) -> impl Iterator<Item = &str> {
        [self.ra_column.as_str(), self.dec_column.as_str()]
            .into_iter()
            .chain(
                self.columns
                    .iter()
                    .map(String::as_str)
                    .filter(move |c| *c != self.ra_column && *c != self.dec_column),
            )
    }
}

impl fmt::Display for CatalogDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}/{})",
            self.name, self.vizier, self.ra_column, self.dec_column
        )
    }
}

/// Lookup table from short catalog keys to their descriptors.
///
/// The default registry knows the usual photometric and astrometric references.
/// Names that are not registered are taken as raw VizieR table identifiers with the
/// `RAJ2000`/`DEJ2000` convention, see [`CatalogRegistry::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRegistry {
    entries: Vec<CatalogDescriptor>,
}

impl Default for CatalogRegistry {
    fn default() -> Self {
        let icrs = |d: CatalogDescriptor| d.with_position_columns("RA_ICRS", "DE_ICRS");
        let gaia = |d: CatalogDescriptor| icrs(d).with_columns(&["Source", "Gmag"]);
        CatalogRegistry {
            entries: vec![
                CatalogDescriptor::new("ps1", "PanSTARRS DR1", "II/349/ps1")
                    .with_columns(&["objID", "gmag", "rmag", "imag", "zmag", "ymag"]),
                gaia(CatalogDescriptor::new("gaiadr2", "Gaia DR2", "I/345/gaia2")),
                gaia(CatalogDescriptor::new("gaiaedr3", "Gaia EDR3", "I/350/gaiaedr3")),
                gaia(CatalogDescriptor::new("gaiadr3", "Gaia DR3", "I/355/gaiadr3")),
                CatalogDescriptor::new("usnob1", "USNO-B1", "I/284/out"),
                CatalogDescriptor::new("gsc", "Guide Star Catalogue", "I/271/out"),
                CatalogDescriptor::new("skymapper", "SkyMapper DR1.1", "II/358/smss")
                    .with_position_columns("RAICRS", "DEICRS"),
                CatalogDescriptor::new("vsx", "AAVSO VSX", "B/vsx/vsx"),
                CatalogDescriptor::new("apass", "APASS DR9", "II/336/apass9"),
                icrs(CatalogDescriptor::new("sdss", "SDSS DR12", "V/147/sdss12")),
                icrs(CatalogDescriptor::new("atlas", "ATLAS-REFCAT2", "J/ApJ/867/105/refcat2")),
                CatalogDescriptor::new("twomass", "2MASS", "II/246/out")
                    .with_columns(&["2MASS", "Jmag", "Hmag", "Kmag"]),
            ],
        }
    }
}

impl CatalogRegistry {
    /// Registry without any entry.
    pub fn empty() -> Self {
        CatalogRegistry { entries: vec![] }
    }

    /// Add a descriptor, replacing any entry with the same key.
    pub fn register(&mut self, descriptor: CatalogDescriptor) {
        match self.entries.iter_mut().find(|d| d.key == descriptor.key) {
            Some(existing) => *existing = descriptor,
            None => self.entries.push(descriptor),
        }
    }

    /// Registered descriptor for `key`, case-insensitive.
    pub fn get(&self, key: &str) -> Option<&CatalogDescriptor> {
        self.entries.iter().find(|d| d.key.eq_ignore_ascii_case(key))
    }

    /// Descriptor for `name`: the registered entry, or `name` taken as a VizieR
    /// table identifier.
    pub fn resolve(&self, name: &str) -> CatalogDescriptor {
        self.get(name)
            .cloned()
            .unwrap_or_else(|| CatalogDescriptor::new(name, name, name))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|d| d.key.as_str())
    }
}
