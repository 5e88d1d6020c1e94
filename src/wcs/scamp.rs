//! # External whole-field astrometric solvers
//!
//! The iterative refinement can be replaced by an out-of-process solver that matches
//! and fits the whole field on its own. [`ScampSolver`] drives
//! [SCAMP](https://www.astromatic.net/software/scamp/):
//!
//! 1. the objects and the reference catalog are written as LDAC files by a caller
//!    supplied [`LdacExporter`] (writing FITS is not a concern of this crate),
//! 2. `scamp` runs in a working directory with a `FILE` reference catalog,
//! 3. the resulting `.head` file is parsed into a [`WcsSolution`] carrying the TPV
//!    distortion found by SCAMP.
//!
//! Every failure of the external run is logged and reported as "no solution".
use std::{collections::HashMap, fmt, fs, process::Command};

use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::Matrix2;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    constants::Degree,
    pipeline_errors::PipelineError,
    tables::{CatalogColumns, CatalogTable, ObjectTable},
    wcs::{TpvDistortion, WcsSolution},
};

/// Everything an external solver may need to solve one image.
#[derive(Debug, Clone, Copy)]
pub struct SolverInputs<'a> {
    pub objects: &'a ObjectTable,
    pub catalog: &'a CatalogTable,
    pub columns: &'a CatalogColumns,
    pub sr: Degree,
    pub order: usize,
    pub initial: Option<&'a WcsSolution>,
}

/// Whole-field astrometric solver running outside of the refinement loop.
pub trait ExternalSolver {
    /// Solve the field.
    ///
    /// Return
    /// ------
    /// * `Ok(None)` when the solver fails or produces no usable solution, an error only
    ///   for malformed inputs.
    fn solve(&self, inputs: &SolverInputs<'_>) -> Result<Option<WcsSolution>, PipelineError>;
}

/// Writer of the LDAC catalogs consumed by SCAMP.
pub trait LdacExporter {
    /// Write the detected objects, with the initial solution in the image header if any.
    fn write_objects(
        &self,
        objects: &ObjectTable,
        wcs: Option<&WcsSolution>,
        path: &Utf8Path,
    ) -> Result<(), PipelineError>;

    /// Write the reference catalog using the given column labels.
    fn write_catalog(
        &self,
        catalog: &CatalogTable,
        columns: &CatalogColumns,
        path: &Utf8Path,
    ) -> Result<(), PipelineError>;
}

/// [`ExternalSolver`] running the SCAMP executable.
pub struct ScampSolver {
    executable: Utf8PathBuf,
    workdir: Utf8PathBuf,
    exporter: Box<dyn LdacExporter + Send + Sync>,
    extra_args: Vec<(String, String)>,
}

impl fmt::Debug for ScampSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScampSolver")
            .field("executable", &self.executable)
            .field("workdir", &self.workdir)
            .field("extra_args", &self.extra_args)
            .finish_non_exhaustive()
    }
}

impl ScampSolver {
    const OBJECTS_FILE: &'static str = "objects.cat";
    const HEAD_FILE: &'static str = "objects.head";
    const REFERENCE_FILE: &'static str = "reference.cat";

    /// Create a solver running `scamp` from the `PATH` inside `workdir`.
    pub fn new(workdir: impl Into<Utf8PathBuf>, exporter: Box<dyn LdacExporter + Send + Sync>) -> Self {
        ScampSolver {
            executable: Utf8PathBuf::from("scamp"),
            workdir: workdir.into(),
            exporter,
            extra_args: Vec::new(),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<Utf8PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    /// Append a `-KEY value` pair to the command line, overriding the defaults.
    pub fn with_arg(mut self, key: &str, value: &str) -> Self {
        self.extra_args.push((key.to_string(), value.to_string()));
        self
    }

    pub fn workdir(&self) -> &Utf8Path {
        &self.workdir
    }

    /// Command line arguments of one run.
    fn command_args(&self, inputs: &SolverInputs<'_>) -> Vec<String> {
        let columns = inputs.columns;
        let mut options: Vec<(String, String)> = vec![
            ("-ASTREF_CATALOG".into(), "FILE".into()),
            ("-ASTREFCAT_NAME".into(), Self::REFERENCE_FILE.into()),
            ("-ASTREFCENT_KEYS".into(), format!("{},{}", columns.ra, columns.dec)),
            ("-ASTREFERR_KEYS".into(), format!("{},{}", columns.ra_err, columns.dec_err)),
            ("-ASTREFMAG_KEY".into(), columns.mag.clone()),
            ("-DISTORT_DEGREES".into(), inputs.order.max(1).to_string()),
            ("-CROSSID_RADIUS".into(), format!("{:.2}", inputs.sr * 3600.0)),
            ("-PROJECTION_TYPE".into(), "TPV".into()),
            ("-SOLVE_PHOTOM".into(), "N".into()),
            ("-CHECKPLOT_TYPE".into(), "NONE".into()),
            ("-VERBOSE_TYPE".into(), "QUIET".into()),
            ("-WRITE_XML".into(), "N".into()),
        ];
        if let Some(err) = &columns.mag_err {
            options.push(("-ASTREFMAGERR_KEY".into(), err.clone()));
        }

        for (key, value) in &self.extra_args {
            let key = if key.starts_with('-') {
                key.clone()
            } else {
                format!("-{key}")
            };
            match options.iter_mut().find(|(k, _)| *k == key) {
                Some(option) => option.1 = value.clone(),
                None => options.push((key, value.clone())),
            }
        }

        std::iter::once(Self::OBJECTS_FILE.to_string())
            .chain(options.into_iter().flat_map(|(k, v)| [k, v]))
            .collect()
    }

    fn run(&self, inputs: &SolverInputs<'_>) -> Result<WcsSolution, PipelineError> {
        fs::create_dir_all(&self.workdir)?;
        let head_path = self.workdir.join(Self::HEAD_FILE);
        if head_path.exists() {
            fs::remove_file(&head_path)?;
        }

        self.exporter.write_objects(
            inputs.objects,
            inputs.initial,
            &self.workdir.join(Self::OBJECTS_FILE),
        )?;
        self.exporter.write_catalog(
            inputs.catalog,
            inputs.columns,
            &self.workdir.join(Self::REFERENCE_FILE),
        )?;

        let args = self.command_args(inputs);
        debug!(executable = %self.executable, args = ?args, "running SCAMP");
        let output = Command::new(self.executable.as_std_path())
            .args(&args)
            .current_dir(self.workdir.as_std_path())
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::ExternalSolverFailed(format!(
                "{} exited with {}: {}",
                self.executable,
                output.status,
                stderr.trim()
            )));
        }
        if !head_path.exists() {
            return Err(PipelineError::ExternalSolverFailed(format!(
                "no header produced at {head_path}"
            )));
        }

        parse_head(&fs::read_to_string(&head_path)?)
    }
}

impl ExternalSolver for ScampSolver {
    fn solve(&self, inputs: &SolverInputs<'_>) -> Result<Option<WcsSolution>, PipelineError> {
        // column problems are input errors, not solver failures
        inputs.catalog.float_column(&inputs.columns.ra)?;
        inputs.catalog.float_column(&inputs.columns.dec)?;
        inputs.catalog.float_column(&inputs.columns.mag)?;

        match self.run(inputs) {
            Ok(wcs) => {
                info!(%wcs, "SCAMP astrometric solution");
                Ok(Some(wcs))
            }
            Err(err) => {
                warn!(%err, "SCAMP refinement failed");
                Ok(None)
            }
        }
    }
}

/// Parse a FITS header in text form (one card per line) into a [`WcsSolution`].
///
/// `CRVALi`, `CRPIXi` and `CDi_j` are required; `PVi_k` cards set the TPV
/// distortion. `CRPIX` is converted from the 1-based FITS convention.
///
/// Return
/// ------
/// * [`PipelineError::InvalidHeaderCard`] for a missing or unparsable card.
pub fn parse_head(text: &str) -> Result<WcsSolution, PipelineError> {
    let card_regex = Regex::new(r"^([A-Z0-9_\-]{1,8})\s*=\s*([^/]*?)\s*(?:/.*)?$")?;
    let pv_regex = Regex::new(r"^PV([12])_(\d{1,2})$")?;

    let cards: HashMap<String, String> = text
        .lines()
        .filter_map(|line| card_regex.captures(line.trim_end()))
        .map(|c| (c[1].to_string(), c[2].trim_matches('\'').trim().to_string()))
        .collect();

    let number = |key: &str| -> Result<f64, PipelineError> {
        let value = cards
            .get(key)
            .ok_or_else(|| PipelineError::InvalidHeaderCard(format!("missing {key}")))?;
        value
            .replace(['D', 'd'], "E")
            .parse::<f64>()
            .map_err(|_| PipelineError::InvalidHeaderCard(format!("{key} = {value}")))
    };

    let crval = (number("CRVAL1")?, number("CRVAL2")?);
    let crpix = (number("CRPIX1")? - 1.0, number("CRPIX2")? - 1.0);
    let cd = Matrix2::new(
        number("CD1_1")?,
        number("CD1_2")?,
        number("CD2_1")?,
        number("CD2_2")?,
    );

    let mut tpv = TpvDistortion::identity();
    for key in cards.keys() {
        if let Some(c) = pv_regex.captures(key) {
            let axis: usize = c[1].parse().unwrap_or(0);
            let term: usize = c[2].parse().unwrap_or(usize::MAX);
            tpv.set(axis, term, number(key)?)?;
        }
    }

    let wcs = WcsSolution::new(crval, crpix, cd)
        .map_err(|_| PipelineError::InvalidHeaderCard("singular CD matrix".into()))?;
    Ok(wcs.with_tpv(tpv))
}
