//! # Constants and type definitions for skypipe
//!
//! This module centralizes the **angular conversion factors**, **default matching
//! radii**, **catalog column conventions** and **common type aliases** used throughout
//! the crate.
//!
//! ## Overview
//!
//! - Unit conversions (degrees ↔ radians, arcseconds ↔ degrees)
//! - Default radii used by the matching and filtering stages
//! - Default column names following the VizieR `J2000` convention
//! - Core type aliases used across the crate

// -------------------------------------------------------------------------------------------------
// Unit conversions
// -------------------------------------------------------------------------------------------------

/// 2π, useful for wrapping right ascension differences
pub const DPI: f64 = 2. * std::f64::consts::PI;

/// Degrees → radians
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// One arcsecond expressed in degrees
pub const ARCSEC: Degree = 1.0 / 3600.0;

/// Numerical epsilon used for floating-point comparisons
pub const EPS: f64 = 1e-12;

// -------------------------------------------------------------------------------------------------
// Default radii
// -------------------------------------------------------------------------------------------------

/// Fallback matching radius, sensible for most reference catalogues (1″)
pub const DEFAULT_MATCH_RADIUS: Degree = ARCSEC;

/// Matching radius of the astrometric refinement (10″)
pub const DEFAULT_ASTROMETRY_RADIUS: Degree = 10.0 * ARCSEC;

/// Matching radius of the low-level photometric match (3″)
pub const DEFAULT_PHOTOMETRY_RADIUS: Degree = 3.0 * ARCSEC;

/// Matching radius for solar-system bodies returned by SkyBot (10″)
pub const DEFAULT_MOVING_OBJECT_RADIUS: Degree = 10.0 * ARCSEC;

// -------------------------------------------------------------------------------------------------
// Catalog column conventions
// -------------------------------------------------------------------------------------------------

pub const DEFAULT_COL_RA: &str = "RAJ2000";
pub const DEFAULT_COL_DEC: &str = "DEJ2000";
pub const DEFAULT_COL_RA_ERR: &str = "e_RAJ2000";
pub const DEFAULT_COL_DEC_ERR: &str = "e_DEJ2000";

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Angle in arcseconds
pub type ArcSec = f64;
/// Angle in radians
pub type Radian = f64;
/// Position on the detector, in pixels (0-based)
pub type Pixel = f64;
/// Astronomical magnitude
pub type Magnitude = f64;
/// Stable identifier of a detected object inside an [`ObjectTable`](crate::tables::ObjectTable)
pub type ObjectId = u64;
