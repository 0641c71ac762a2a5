//! Firmware archive manifest and flash-job resolution.
//!
//! An archive is a directory holding firmware images plus `manifest.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "files": {
//!     "cf2.bin":   { "platform": "cf2", "target": "stm32", "type": "fw" },
//!     "cf2_nrf.bin": { "platform": "cf2", "target": "nrf51", "type": "fw" }
//!   }
//! }
//! ```
//!
//! Unknown fields are ignored. Files are visited in name order, which
//! fixes the flashing order. File names are plain paths relative to the
//! archive; `..`, roots and prefixes are rejected.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{FlashTarget, Target, TargetType};
use crate::error::{FlashError, ManifestError};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Descriptor used for raw (non-archive) images.
pub const RAW_IMAGE_DESCRIPTOR: &str = "binary";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub subversion: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, FirmwareDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareDetails {
    #[serde(default)]
    pub platform: String,
    /// Target name, e.g. `"stm32"`.
    pub target: String,
    /// Descriptor, e.g. `"fw"`.
    #[serde(rename = "type")]
    pub kind: String,
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json).map_err(|e| ManifestError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ManifestError> {
        serde_json::to_string_pretty(self).map_err(|e| ManifestError::Parse(e.to_string()))
    }

    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let json = fs::read_to_string(path).map_err(|e| ManifestError::Io(e.to_string()))?;
        Self::from_json(&json)
    }

    pub fn write(&self, path: &Path) -> Result<(), ManifestError> {
        fs::write(path, self.to_json()?).map_err(|e| ManifestError::Io(e.to_string()))
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>, ManifestError> {
    let image = fs::read(path).map_err(|e| ManifestError::Io(e.to_string()))?;
    debug!("read {} ({} bytes)", path.display(), image.len());
    Ok(image)
}

/// Turn an archive directory or a raw image into flash jobs.
///
/// `targets` are the targets the bootloader reported. Empty entries in
/// `target_names` are ignored; the rest must all be known target names.
/// For an archive, manifest entries whose target the device did not
/// report or whose file is missing are skipped with a warning, and a
/// non-empty `target_names` keeps only the entries it names. A raw image
/// requires exactly one target name.
pub fn collect_flash_targets(
    path: &Path,
    target_names: &[&str],
    targets: &BTreeMap<TargetType, Target>,
) -> crate::Result<Vec<FlashTarget>> {
    if !path.exists() {
        return Err(ManifestError::NotFound(path.to_path_buf()).into());
    }
    let names: Vec<&str> = target_names
        .iter()
        .copied()
        .filter(|n| !n.is_empty())
        .collect();
    if let Some(unknown) = names.iter().find(|n| TargetType::from_name(n).is_none()) {
        return Err(ManifestError::UnknownTarget((*unknown).to_owned()).into());
    }

    if path.is_dir() {
        return collect_from_archive(path, &names, targets);
    }

    let [name] = names.as_slice() else {
        return Err(
            ManifestError::Usage("not an archive: exactly one target name is required").into(),
        );
    };
    let target = TargetType::from_name(name)
        .and_then(|kind| targets.get(&kind))
        .ok_or_else(|| FlashError::UnknownTarget((*name).to_owned()))?;
    Ok(vec![FlashTarget::new(
        *target,
        read_image(path)?,
        RAW_IMAGE_DESCRIPTOR,
    )])
}

fn is_archive_member(file: &str) -> bool {
    let path = Path::new(file);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn collect_from_archive(
    dir: &Path,
    names: &[&str],
    targets: &BTreeMap<TargetType, Target>,
) -> crate::Result<Vec<FlashTarget>> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(ManifestError::MissingManifest(dir.to_path_buf()).into());
    }
    let manifest = Manifest::read(&manifest_path)?;
    if let Some(file) = manifest.files.keys().find(|f| !is_archive_member(f)) {
        return Err(ManifestError::UnsafePath(file.clone()).into());
    }

    let mut jobs = Vec::new();
    for (file, details) in &manifest.files {
        let Some(target) = TargetType::from_name(&details.target).and_then(|k| targets.get(&k))
        else {
            warn!("no target found for {} ({})", file, details.target);
            continue;
        };
        if !names.is_empty() && !names.contains(&details.target.as_str()) {
            debug!("skipping {} (target {} not selected)", file, details.target);
            continue;
        }
        let image_path = dir.join(file);
        if !image_path.is_file() {
            warn!("{} is listed in the manifest but missing", image_path.display());
            continue;
        }
        jobs.push(FlashTarget::new(
            *target,
            read_image(&image_path)?,
            details.kind.clone(),
        ));
    }
    Ok(jobs)
}
