use anyhow::Context;
use shardstrap::BootstrapReport;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Writes the report next to its destination, then renames it into place.
pub fn write_report(path: &Path, report: &BootstrapReport) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temporary report in {}", dir.display()))?;

    serde_json::to_writer_pretty(&mut temp, report).context("serialize report")?;
    temp.write_all(b"\n").context("write report")?;
    temp.flush().context("flush report")?;
    temp.persist(path)
        .with_context(|| format!("move report to {}", path.display()))?;
    Ok(())
}
