use crate::config::{ArtifactPaths, FileError};
use std::fs;
use std::path::Path;

const GEOIP_COUNTRIES: &[&str] = &["CN"];

/// Copies bundled GeoIP databases and engine templates into the directories
/// the engine expects. Failures are logged and never abort setup.
pub fn provision_static_data(bundle_dir: &Path, paths: &ArtifactPaths) {
    if let Err(e) = copy_geoip_data(bundle_dir, paths) {
        tracing::warn!("GeoIP data provisioning failed: {}", e);
    }
    if let Err(e) = copy_template_data(bundle_dir, paths) {
        tracing::warn!("Template provisioning failed: {}", e);
    }
}

fn copy_geoip_data(bundle_dir: &Path, paths: &ArtifactPaths) -> Result<(), FileError> {
    for country in GEOIP_COUNTRIES {
        let file_name = format!("geoip-{}.data", country.to_lowercase());
        let from = bundle_dir.join(&file_name);
        if !from.is_file() {
            continue;
        }
        copy_replacing(&from, &paths.engine_conf_dir().join(&file_name))?;
    }
    Ok(())
}

fn copy_template_data(bundle_dir: &Path, paths: &ArtifactPaths) -> Result<(), FileError> {
    let template_src = bundle_dir.join("template");
    if !template_src.is_dir() {
        return Ok(());
    }
    let io_error = |e| FileError::Io(template_src.to_string_lossy().to_string(), e);
    for entry in fs::read_dir(&template_src).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        if entry.path().is_file() {
            copy_replacing(
                &entry.path(),
                &paths.template_dir().join(entry.file_name()),
            )?;
        }
    }
    Ok(())
}

fn copy_replacing(from: &Path, to: &Path) -> Result<(), FileError> {
    let io_error = |e| FileError::Io(to.to_string_lossy().to_string(), e);
    match to.try_exists() {
        Ok(true) => fs::remove_file(to).map_err(io_error)?,
        Ok(false) => {}
        Err(e) => Err(io_error(e))?,
    }
    fs::copy(from, to).map_err(io_error)?;
    Ok(())
}
