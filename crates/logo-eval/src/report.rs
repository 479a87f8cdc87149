use anyhow::{Context, Result};
use logo_proto::EvaluationReport;
use std::fs;
use std::io::Write;
use std::path::Path;

pub fn render_report(report: &EvaluationReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("serialize report")
}

/// Writes the report in one step: temp file beside the target, then rename.
pub fn write_report(path: &Path, report: &EvaluationReport) -> Result<()> {
    let body = render_report(report)?;
    if let Some(p) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(p).with_context(|| format!("create {}", p.display()))?;
    }
    let mut tmp_name = path.file_name().context("report path has no file name")?.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let res = (|| {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(body.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(e) = res {
        fs::remove_file(&tmp).ok();
        return Err(e).with_context(|| format!("write report {}", path.display()));
    }
    Ok(())
}

pub fn read_report(path: &Path) -> Result<EvaluationReport> {
    let s = fs::read_to_string(path).with_context(|| format!("read report {}", path.display()))?;
    serde_json::from_str(&s).context("parse report json")
}
