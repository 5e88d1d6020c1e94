//! NED extragalactic objects through its TAP service.
use itertools::Itertools;

use crate::{constants::Degree, pipeline_errors::PipelineError, tables::CatalogTable};

/// Synchronous TAP endpoint of NED.
pub const NED_TAP_URL: &str = "https://ned.ipac.caltech.edu/tap/sync";

/// Column names of the parsed table.
pub const COL_RA: &str = "ra";
pub const COL_DEC: &str = "dec";

/// ADQL selecting the NED objects inside a cone.
pub fn region_query(center: (Degree, Degree), radius: Degree) -> String {
    cones_query(&[center], radius)
}

/// ADQL selecting the NED objects inside any of several cones of the same radius.
pub fn cones_query(centers: &[(Degree, Degree)], radius: Degree) -> String {
    let cones = centers
        .iter()
        .map(|(ra, dec)| {
            format!("CONTAINS(POINT('J2000', ra, dec), CIRCLE('J2000', {ra:.8}, {dec:.8}, {radius:.8}))=1")
        })
        .join(" OR ");
    format!("SELECT prefname, pretype, ra, dec, z FROM NEDTAP.objdir WHERE {cones}")
}

/// Parse a NED TAP CSV response.
pub fn parse_response(body: &str) -> Result<CatalogTable, PipelineError> {
    if body.trim_start().starts_with('<') {
        return Err(PipelineError::ServiceResponse(
            "NED: unexpected XML answer".into(),
        ));
    }
    let table = CatalogTable::from_csv(body)?;
    table.float_column(COL_RA)?;
    table.float_column(COL_DEC)?;
    Ok(table)
}
