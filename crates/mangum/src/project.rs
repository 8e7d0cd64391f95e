use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{self, Descriptor};

pub const DESCRIPTOR_FILE: &str = "mangum.yml";
const REQUIREMENT_LINE: &str = "mangum";

#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub root: PathBuf,
}

impl ProjectLayout {
    pub fn descriptor(&self) -> PathBuf {
        self.root.join(DESCRIPTOR_FILE)
    }
    pub fn requirements(&self) -> PathBuf {
        self.root.join("requirements.txt")
    }
    pub fn code_dir(&self, descriptor: &Descriptor) -> PathBuf {
        self.root.join(&descriptor.code_dir)
    }
    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(".mangum")
    }
    pub fn archive(&self, stack_name: &str) -> PathBuf {
        self.artifacts_dir().join(format!("{stack_name}.zip"))
    }
    pub fn template(&self) -> PathBuf {
        self.artifacts_dir().join("template.json")
    }
    pub fn state(&self) -> PathBuf {
        self.artifacts_dir().join("state.json")
    }

    pub fn load_descriptor(&self) -> Result<Descriptor> {
        config::load_descriptor(&self.descriptor())
    }
}

pub fn load_layout(project_override: Option<PathBuf>) -> Result<ProjectLayout> {
    let root = match project_override {
        Some(p) => p,
        None => std::env::current_dir().context("get current working directory")?,
    };
    Ok(ProjectLayout { root })
}

/// Writes the initial descriptor and makes sure `requirements.txt` pulls in mangum.
///
/// An illegal stack name only produces a warning; stack operations refuse it later.
pub fn init_project(layout: &ProjectLayout, descriptor: &Descriptor) -> Result<()> {
    if !config::is_legal_stack_name(&descriptor.name) {
        tracing::warn!(name = %descriptor.name, "illegal stack name");
        print_stack_name_warning();
    }

    println!("Generating initial configuration...");
    fs::create_dir_all(&layout.root)
        .with_context(|| format!("create directory {}", layout.root.display()))?;
    if layout.descriptor().exists() {
        tracing::info!(path = %layout.descriptor().display(), "overwriting existing descriptor");
    }
    config::save_yaml(&layout.descriptor(), descriptor)?;
    ensure_lines(&layout.requirements(), &[REQUIREMENT_LINE])?;
    println!("Configuration saved to: {}", layout.descriptor().display());
    Ok(())
}

fn print_stack_name_warning() {
    println!("*** WARNING ***");
    println!("Illegal stack name.");
    println!("A stack name can contain only alphanumeric characters (case-sensitive) and hyphens.");
    println!("It must start with an alphabetic character and can't be longer than 128 characters.");
    println!("(https://docs.aws.amazon.com/AWSCloudFormation/latest/UserGuide/cfn-using-console-create-stack-parameters.html)");
    println!();
}

fn ensure_lines(path: &Path, lines: &[&str]) -> Result<()> {
    let existing = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
    } else {
        String::new()
    };

    let mut out = existing.clone();
    for line in lines {
        if !out.lines().any(|l| l.trim_end() == *line) {
            if !out.ends_with('\n') && !out.is_empty() {
                out.push('\n');
            }
            out.push_str(line);
            out.push('\n');
        }
    }

    if out != existing {
        fs::write(path, out).with_context(|| format!("write {}", path.display()))?;
    }

    Ok(())
}
