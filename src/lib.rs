pub mod astrometry;
pub mod catalogs;
pub mod constants;
mod conversion;
pub mod env_state;
mod lsq;
pub mod matching;
pub mod photometry;
pub mod pipeline;
pub mod pipeline_errors;
pub mod sphere;
pub mod tables;
pub mod transients;
pub mod wcs;
