//! IMCCE SkyBot cone search for known solar-system bodies.
//!
//! The service answers in plain text: a `# Flag: n` status line, a commented header
//! and one `|`-separated row per body, with sexagesimal coordinates:
//!
//! ```text
//! # Flag: 1
//! # Ticket: 1166021566431
//! # Num | Name | Class | RA(h) | DE(deg) | Mv | Err(arcsec) | d(arcsec)
//! 1 | Ceres | MB>Middle | 10 40 08.2375 | +12 18 27.061 | 8.6 | 0.002 | 85.4
//! ```
use hifitime::Epoch;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::{
    constants::Degree,
    conversion::{parse_dec_degrees, parse_ra_hours},
    pipeline_errors::PipelineError,
    tables::{CatalogTable, Column},
};

/// SkyBot cone search endpoint.
pub const SKYBOT_URL: &str = "https://ssp.imcce.fr/webservices/skybot/api/conesearch.php";

/// Observatory code of the geocenter.
pub const GEOCENTER: &str = "500";

/// Column names of the parsed table.
pub const COL_RA: &str = "RA";
pub const COL_DEC: &str = "DEC";

/// One body of the SkyBot answer, read by position.
#[derive(Debug, Deserialize, PartialEq)]
struct SkybotRecord {
    num: String,
    name: String,
    class: String,
    ra: String,
    dec: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    mv: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    err: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    dist: Option<f64>,
}

/// Query string parameters of a cone search.
///
/// Arguments
/// ---------
/// * `time`: epoch of the observation
/// * `center`, `radius`: the search cone, degrees
pub(crate) fn cone_parameters(time: Epoch, center: (Degree, Degree), radius: Degree) -> Vec<(&'static str, String)> {
    vec![
        ("-ep", format!("{:.6}", time.to_jde_utc_days())),
        ("-ra", format!("{:.8}", center.0)),
        ("-dec", format!("{:.8}", center.1)),
        ("-rd", format!("{:.8}", radius)),
        ("-mime", "text".to_string()),
        ("-output", "object".to_string()),
        ("-loc", GEOCENTER.to_string()),
        ("-filter", "0".to_string()),
        ("-objFilter", "111".to_string()),
        ("-refsys", "EQJ2000".to_string()),
    ]
}

/// Parse a SkyBot text answer.
///
/// Return
/// ------
/// * `Ok(None)` when the service reports no body in the cone (`Flag: 0`),
/// * the bodies with `RA`/`DEC` in degrees, plus `Num`, `Name`, `Class`, `Mv`,
///   `posunc` and `centerdist` columns,
/// * [`PipelineError::ServiceResponse`] when the status line is missing or reports an
///   error.
pub fn parse_response(body: &str) -> Result<Option<CatalogTable>, PipelineError> {
    let flag_regex = Regex::new(r"(?m)^#\s*Flag:\s*(-?\d+)")?;
    let flag: i32 = flag_regex
        .captures(body)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| PipelineError::ServiceResponse("SkyBot: missing status flag".into()))?;

    match flag {
        0 => return Ok(None),
        1 => {}
        _ => {
            let message = body
                .lines()
                .find(|l| !l.starts_with('#') && !l.trim().is_empty())
                .unwrap_or("")
                .trim();
            return Err(PipelineError::ServiceResponse(format!(
                "SkyBot flag {flag}: {message}"
            )));
        }
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'|')
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut table = SkybotColumns::default();
    for record in reader.deserialize::<SkybotRecord>() {
        let record = record?;
        let (Some(ra), Some(dec)) = (parse_ra_hours(&record.ra), parse_dec_degrees(&record.dec))
        else {
            debug!(name = %record.name, "skipping SkyBot row with malformed coordinates");
            continue;
        };
        table.push(record, ra, dec);
    }
    Ok(Some(table.into_table()?))
}

#[derive(Default)]
struct SkybotColumns {
    num: Vec<String>,
    name: Vec<String>,
    class: Vec<String>,
    ra: Vec<f64>,
    dec: Vec<f64>,
    mv: Vec<f64>,
    posunc: Vec<f64>,
    centerdist: Vec<f64>,
}

impl SkybotColumns {
    fn push(&mut self, record: SkybotRecord, ra: Degree, dec: Degree) {
        self.num.push(record.num);
        self.name.push(record.name);
        self.class.push(record.class);
        self.ra.push(ra);
        self.dec.push(dec);
        self.mv.push(record.mv.unwrap_or(f64::NAN));
        self.posunc.push(record.err.unwrap_or(f64::NAN));
        self.centerdist.push(record.dist.unwrap_or(f64::NAN));
    }

    fn into_table(self) -> Result<CatalogTable, PipelineError> {
        CatalogTable::new()
            .with_column("Num", Column::Text(self.num))?
            .with_column("Name", Column::Text(self.name))?
            .with_column("Class", Column::Text(self.class))?
            .with_float_column(COL_RA, self.ra)?
            .with_float_column(COL_DEC, self.dec)?
            .with_float_column("Mv", self.mv)?
            .with_float_column("posunc", self.posunc)?
            .with_float_column("centerdist", self.centerdist)
    }
}
