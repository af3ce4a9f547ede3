use anyhow::Result;
use libmultidev::{MultidevError, Output, OutputError, ProvisionReport, PushOutcome};
use std::result::Result as StdResult;

/// Emit an output result, mapping errors into `MultidevError`.
pub fn emit(result: StdResult<(), OutputError>) -> Result<()> {
    result.map_err(MultidevError::from)?;
    Ok(())
}

/// Render the summary of a finished run.
pub fn render_report(output: &dyn Output, report: &ProvisionReport) -> Result<()> {
    let section = output.section(&format!("{}.{}", report.site, report.environment));

    if report.replaced_existing {
        emit(section.message("replaced the previous environment"))?;
    }
    match &report.push {
        Some(PushOutcome::Pushed(_)) => emit(section.message("pushed merged branch"))?,
        Some(PushOutcome::UpToDate) => emit(section.message("branch already up to date"))?,
        None => emit(section.warn("no code was merged"))?,
    }
    emit(section.success(&format!("ready at {}", report.preview_url)))?;
    Ok(())
}
