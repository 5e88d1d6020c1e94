//! # Object and catalog tables
//!
//! Two table shapes flow through the pipeline:
//!
//! - [`ObjectTable`]: detections measured on one image, one [`ObjectRecord`] per row,
//!   with the optional measurements typed as [`Option`].
//! - [`CatalogTable`]: reference catalogs, stored column by column under catalog
//!   specific labels and read through a [`CatalogColumns`] mapping.
//!
//! Tables are supplied by the caller. Pipeline stages work on copies; the only
//! in-place writes are [`ObjectTable::apply_wcs`] and [`ObjectTable::apply_calibration`].
pub mod catalog;
pub mod objects;

pub use catalog::{CatalogColumns, CatalogTable, Column};
pub use objects::{ObjectColumns, ObjectRecord, ObjectTable};
