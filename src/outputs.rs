//! Pipeline step outputs
//!
//! Drone-compatible plugin steps export variables by writing `KEY=value` lines
//! to a file the runner names. Non-sensitive values go to the plain output file
//! and the token goes to the secret output file, which the runner masks.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::workflow::RotationReport;
use crate::Error;

/// Output key holding the minted secret name
pub const CREATED_TOKEN_KEY: &str = "created_token";
/// Output key holding the destination identifier
pub const UPDATED_SECRET_KEY: &str = "updated_secret";
/// Secret output key holding the token value
pub const TOKEN_KEY: &str = "token";

/// Write `outputs` as `KEY=value` lines, replacing any existing file
pub fn write_outputs(path: &Path, outputs: &BTreeMap<&str, &str>) -> Result<(), Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (key, value) in outputs {
        writeln!(writer, "{key}={value}")?;
    }
    writer.flush()?;
    debug!(path = %path.display(), count = outputs.len(), "Wrote step outputs");
    Ok(())
}

/// Write both output files for a successful run
pub fn write_report(
    report: &RotationReport,
    output_file: &Path,
    secret_output_file: &Path,
) -> Result<(), Error> {
    write_outputs(
        output_file,
        &BTreeMap::from([
            (CREATED_TOKEN_KEY, report.token_secret.name.as_str()),
            (UPDATED_SECRET_KEY, report.identifier.as_str()),
        ]),
    )?;
    write_outputs(
        secret_output_file,
        &BTreeMap::from([(TOKEN_KEY, report.token().expose())]),
    )
}
