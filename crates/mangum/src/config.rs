use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::MangumError;

pub const DEFAULT_RUNTIME: &str = "python3.12";
const MAX_STACK_NAME_LEN: usize = 128;
const MAX_LAMBDA_TIMEOUT: u32 = 900;

/// Deployment settings persisted in `mangum.yml`.
///
/// Field order is the order keys are written by `init`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Descriptor {
    pub name: String,

    #[serde(default = "default_code_dir")]
    pub code_dir: String,

    #[serde(default = "default_handler")]
    pub handler: String,

    #[serde(default)]
    pub bucket_name: Option<String>,

    #[serde(default)]
    pub region_name: Option<String>,

    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default)]
    pub websockets: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u32,

    #[serde(default = "default_true")]
    pub s3_access: bool,

    #[serde(default = "default_true")]
    pub dynamodb_access: bool,
}

fn default_code_dir() -> String {
    "app".to_string()
}
fn default_handler() -> String {
    "asgi.handler".to_string()
}
fn default_runtime() -> String {
    DEFAULT_RUNTIME.to_string()
}
fn default_timeout() -> u32 {
    300
}
fn default_true() -> bool {
    true
}

impl Descriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code_dir: default_code_dir(),
            handler: default_handler(),
            bucket_name: None,
            region_name: None,
            runtime: default_runtime(),
            websockets: false,
            timeout: default_timeout(),
            s3_access: true,
            dynamodb_access: true,
        }
    }

    /// Checks that apply to every loaded descriptor.
    pub fn check(&self) -> Result<(), MangumError> {
        if self.name.trim().is_empty() {
            return Err(MangumError::InvalidDescriptor("name cannot be empty".into()));
        }
        for (key, value) in [
            ("code_dir", &self.code_dir),
            ("handler", &self.handler),
            ("runtime", &self.runtime),
        ] {
            if value.trim().is_empty() {
                return Err(MangumError::InvalidDescriptor(format!("{key} cannot be empty")));
            }
        }
        if self.timeout == 0 || self.timeout > MAX_LAMBDA_TIMEOUT {
            return Err(MangumError::InvalidDescriptor(format!(
                "timeout must be between 1 and {MAX_LAMBDA_TIMEOUT} seconds (got {})",
                self.timeout
            )));
        }
        Ok(())
    }

    /// The CloudFormation stack name, refusing names CloudFormation would reject.
    pub fn stack_name(&self) -> Result<&str, MangumError> {
        if is_legal_stack_name(&self.name) {
            Ok(&self.name)
        } else {
            Err(MangumError::IllegalStackName(self.name.clone()))
        }
    }

    pub fn bucket(&self) -> Result<&str, MangumError> {
        self.bucket_name
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or(MangumError::MissingBucket)
    }
}

pub fn is_legal_stack_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z][a-zA-Z-]+$").expect("stack name pattern is valid")
    });
    re.is_match(name) && name.len() <= MAX_STACK_NAME_LEN
}

/// Reads and checks the descriptor at `path`.
pub fn load_descriptor(path: &Path) -> Result<Descriptor> {
    if !path.is_file() {
        return Err(MangumError::DescriptorNotFound(path.to_path_buf()).into());
    }
    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let descriptor: Descriptor =
        serde_yaml::from_str(&data).map_err(|source| MangumError::MalformedDescriptor {
            path: path.to_path_buf(),
            source,
        })?;
    descriptor.check()?;
    tracing::debug!(path = %path.display(), name = %descriptor.name, "loaded descriptor");
    Ok(descriptor)
}

pub fn save_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let s = serde_yaml::to_string(value).context("serialize yaml")?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_roundtrip_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mangum.yml");

        let mut d = Descriptor::new("my-app");
        d.bucket_name = Some("my-bucket".to_string());
        d.region_name = Some("eu-west-1".to_string());
        d.runtime = "python3.11".to_string();
        d.s3_access = false;

        save_yaml(&path, &d).unwrap();
        let loaded = load_descriptor(&path).unwrap();
        assert_eq!(loaded, d);
    }

    #[test]
    fn keys_are_written_in_declaration_order() {
        let s = serde_yaml::to_string(&Descriptor::new("app")).unwrap();
        let keys: Vec<&str> = s.lines().filter_map(|l| l.split(':').next()).collect();
        assert_eq!(
            keys,
            [
                "name",
                "code_dir",
                "handler",
                "bucket_name",
                "region_name",
                "runtime",
                "websockets",
                "timeout",
                "s3_access",
                "dynamodb_access"
            ]
        );
        assert!(s.contains("bucket_name: null"));
    }

    #[test]
    fn missing_keys_take_defaults() {
        let d: Descriptor = serde_yaml::from_str("name: demo\n").unwrap();
        assert_eq!(d, Descriptor::new("demo"));
    }

    #[test]
    fn unknown_keys_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mangum.yml");
        fs::write(&path, "name: demo\nmemory: 512\n").unwrap();

        let err = load_descriptor(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MangumError>(),
            Some(MangumError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_descriptor(&dir.path().join("mangum.yml")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MangumError>(),
            Some(MangumError::DescriptorNotFound(_))
        ));
    }

    #[test]
    fn timeout_out_of_range_is_rejected() {
        let mut d = Descriptor::new("demo");
        d.timeout = 901;
        assert!(d.check().is_err());
        d.timeout = 0;
        assert!(d.check().is_err());
        d.timeout = 900;
        assert!(d.check().is_ok());
    }

    #[test]
    fn stack_name_rule() {
        assert!(is_legal_stack_name("my-app"));
        assert!(is_legal_stack_name("MyApp"));
        assert!(!is_legal_stack_name("a"));
        assert!(!is_legal_stack_name("1app"));
        assert!(!is_legal_stack_name("-app"));
        assert!(!is_legal_stack_name("my_app"));
        assert!(!is_legal_stack_name("app2"));
        assert!(is_legal_stack_name(&"a".repeat(128)));
        assert!(!is_legal_stack_name(&"a".repeat(129)));
    }

    #[test]
    fn bucket_is_required_and_non_blank() {
        let mut d = Descriptor::new("demo");
        assert!(matches!(d.bucket(), Err(MangumError::MissingBucket)));
        d.bucket_name = Some("  ".to_string());
        assert!(d.bucket().is_err());
        d.bucket_name = Some("code".to_string());
        assert_eq!(d.bucket().unwrap(), "code");
    }
}
