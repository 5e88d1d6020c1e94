//! TAPVizieR region queries.
use itertools::Itertools;

use crate::{
    catalogs::registry::CatalogDescriptor,
    constants::Degree,
    pipeline_errors::PipelineError,
    tables::CatalogTable,
};

/// Synchronous TAP endpoint of VizieR at CDS.
pub const TAP_VIZIER_URL: &str = "https://tapvizier.cds.unistra.fr/TAPVizieR/tap/sync";

/// Row limit of one region query.
pub const DEFAULT_MAX_ROWS: usize = 100_000;

/// Quoted, comma separated list of the columns requested for `descriptor`.
fn select_list(descriptor: &CatalogDescriptor) -> String {
    descriptor
        .selected_columns()
        .map(|c| format!("\"{c}\""))
        .join(", ")
}

fn contains(descriptor: &CatalogDescriptor, center: (Degree, Degree), radius: Degree) -> String {
    format!(
        "1=CONTAINS(POINT('ICRS', \"{ra}\", \"{dec}\"), CIRCLE('ICRS', {ra0:.8}, {dec0:.8}, {radius:.8}))",
        ra = descriptor.ra_column,
        dec = descriptor.dec_column,
        ra0 = center.0,
        dec0 = center.1,
    )
}

/// ADQL selecting the rows of the catalog inside a cone.
///
/// Only the position columns and the extra columns of the descriptor are requested.
///
/// Arguments
/// ---------
/// * `descriptor`: the catalog table and its columns
/// * `center`: cone center `(ra, dec)`, degrees
/// * `radius`: cone radius, degrees
pub fn region_query(descriptor: &CatalogDescriptor, center: (Degree, Degree), radius: Degree) -> String {
    cones_query(descriptor, &[center], radius)
}

/// ADQL selecting the rows inside any of several cones of the same radius.
pub fn cones_query(descriptor: &CatalogDescriptor, centers: &[(Degree, Degree)], radius: Degree) -> String {
    format!(
        "SELECT {} FROM \"{}\" WHERE {}",
        select_list(descriptor),
        descriptor.vizier,
        centers
            .iter()
            .map(|&center| contains(descriptor, center, radius))
            .join(" OR ")
    )
}

/// Parse a TAPVizieR CSV response.
///
/// Return
/// ------
/// * The rows, or an error when the payload is not CSV or lacks the position columns
///   of the catalog.
pub fn parse_response(descriptor: &CatalogDescriptor, body: &str) -> Result<CatalogTable, PipelineError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        // VOTable error document instead of CSV
        return Err(PipelineError::ServiceResponse(format!(
            "{}: unexpected XML answer",
            descriptor.vizier
        )));
    }

    let table = CatalogTable::from_csv(body)?;
    for column in [&descriptor.ra_column, &descriptor.dec_column] {
        table.float_column(column)?;
    }
    Ok(table)
}

#[cfg(test)]
mod vizier_test {
    use super::*;
    use crate::{
        catalogs::{is_truncated, registry::CatalogRegistry, tap_parameters},
        tables::Column,
    };

    #[test]
    fn test_region_query() {
        let registry = CatalogRegistry::default();
        let query = region_query(registry.get("gaiadr3").unwrap(), (150.5, -2.25), 0.1);
        assert_eq!(
            query,
            "SELECT \"RA_ICRS\", \"DE_ICRS\", \"Source\", \"Gmag\" FROM \"I/355/gaiadr3\" \
             WHERE 1=CONTAINS(POINT('ICRS', \"RA_ICRS\", \"DE_ICRS\"), \
             CIRCLE('ICRS', 150.50000000, -2.25000000, 0.10000000))"
        );
        let params = tap_parameters(&query, "100");
        assert_eq!(params[3], ("MAXREC", "100"));
        assert_eq!(params[4].1, query);
    }

    #[test]
    fn test_cones_query() {
        let raw = CatalogRegistry::default().resolve("J/X/1");
        assert_eq!(
            cones_query(&raw, &[(1.0, 2.0), (3.0, -4.0)], 0.5),
            "SELECT \"RAJ2000\", \"DEJ2000\" FROM \"J/X/1\" \
             WHERE 1=CONTAINS(POINT('ICRS', \"RAJ2000\", \"DEJ2000\"), \
             CIRCLE('ICRS', 1.00000000, 2.00000000, 0.50000000)) \
             OR 1=CONTAINS(POINT('ICRS', \"RAJ2000\", \"DEJ2000\"), \
             CIRCLE('ICRS', 3.00000000, -4.00000000, 0.50000000))"
        );
    }

    #[test]
    fn test_truncated_answer() {
        let raw = CatalogRegistry::default().resolve("J/X/1");
        let body = "RAJ2000,DEJ2000\n10.0,20.0\n10.1,20.0\n10.2,20.0\n";
        let table = parse_response(&raw, body).unwrap();
        assert_eq!(table.len(), 3);
        assert!(is_truncated(table.len(), 3));
        assert!(!is_truncated(table.len(), 4));

        let table = parse_response(&raw, "RAJ2000,DEJ2000\n").unwrap();
        assert!(!is_truncated(table.len(), DEFAULT_MAX_ROWS));
    }

    #[test]
    fn test_parse_response() {
        let ps1 = CatalogRegistry::default().resolve("ps1");
        let body = "RAJ2000,DEJ2000,objID,gmag,e_gmag\n\
                    150.001,2.0001,108471500010001,18.12,0.01\n\
                    150.002,2.0002,108471500020002,,\n";
        let table = parse_response(&ps1, body).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.float_column("RAJ2000").unwrap(), &[150.001, 150.002]);
        assert!(table.float_column("gmag").unwrap()[1].is_nan());
        assert!(matches!(table.column("objID").unwrap(), Column::Float(_)));
    }

    #[test]
    fn test_parse_errors() {
        let ps1 = CatalogRegistry::default().resolve("ps1");
        assert!(matches!(
            parse_response(&ps1, "<?xml version=\"1.0\"?><VOTABLE/>"),
            Err(PipelineError::ServiceResponse(_))
        ));
        assert_eq!(
            parse_response(&ps1, "ra,dec\n1,2\n").unwrap_err(),
            PipelineError::MissingColumn("RAJ2000".into())
        );
    }
}
