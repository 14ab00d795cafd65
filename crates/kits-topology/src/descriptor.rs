//! ---
//! dr_section: "02-broker-interfaces"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Kit topology loading from descriptor archives."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! Descriptor parsing and archive extraction.
use std::io::Read;

use flate2::read::GzDecoder;
use indexmap::IndexMap;
use kits_model::Kit;
use serde::Deserialize;

use crate::TopologyError;

#[derive(Debug, Deserialize)]
struct KitsFile {
    #[serde(default)]
    kits: IndexMap<String, Kit>,
}

/// Parse a descriptor document, keeping the kit order of the file.
pub fn parse_descriptor(yaml: &str) -> Result<Vec<Kit>, TopologyError> {
    let file: KitsFile =
        serde_yaml::from_str(yaml).map_err(|err| TopologyError::Decode(err.to_string()))?;
    Ok(file
        .kits
        .into_iter()
        .map(|(name, mut kit)| {
            kit.name = name;
            kit
        })
        .collect())
}

/// Return the first regular file in a gzip tarball whose path ends with `suffix`.
pub fn extract_descriptor(archive: &[u8], suffix: &str) -> Result<String, TopologyError> {
    let mut tarball = tar::Archive::new(GzDecoder::new(archive));
    let entries = tarball
        .entries()
        .map_err(|err| TopologyError::Archive(err.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|err| TopologyError::Archive(err.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .map(|path| path.to_string_lossy().ends_with(suffix))
            .map_err(|err| TopologyError::Archive(err.to_string()))?;
        if matches {
            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|err| TopologyError::Archive(format!("failed to read {suffix}: {err}")))?;
            return Ok(content);
        }
    }
    Err(TopologyError::DescriptorMissing(suffix.to_owned()))
}

/// Keep the kits whose name contains `filter`. An empty filter keeps everything.
pub fn apply_filter(kits: Vec<Kit>, filter: Option<&str>) -> Vec<Kit> {
    match filter.filter(|f| !f.is_empty()) {
        Some(needle) => kits
            .into_iter()
            .filter(|kit| kit.name.contains(needle))
            .collect(),
        None => kits,
    }
}
