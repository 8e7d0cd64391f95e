use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployState {
    #[serde(default = "schema_v1")]
    pub schema_version: String,

    #[serde(default)]
    pub package: Option<PackageRecord>,

    #[serde(default)]
    pub stack: Option<StackRecord>,
}

fn schema_v1() -> String {
    "1.0".to_string()
}

impl Default for DeployState {
    fn default() -> Self {
        Self {
            schema_version: schema_v1(),
            package: None,
            stack: None,
        }
    }
}

/// Last archive uploaded by `package`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageRecord {
    pub bucket: String,
    pub key: String,
    pub sha256: String,
    /// Path of the rendered template, relative to the project root.
    pub template: String,
    #[serde(default)]
    pub packaged_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StackRecord {
    #[serde(default)]
    pub stack_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub deployed_at: Option<String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

pub fn load_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parse json {}", path.display()))
}

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let s = serde_json::to_string_pretty(value).context("serialize json")?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
