use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::{DirEntry, WalkDir};

use crate::config::Descriptor;
use crate::error::MangumError;
use crate::project::ProjectLayout;

/// Assembles `build/` from the code directory and, unless `no_pip`, the
/// installed requirements.
pub fn build(layout: &ProjectLayout, descriptor: &Descriptor, no_pip: bool) -> Result<()> {
    let code_dir = layout.code_dir(descriptor);
    if !code_dir.is_dir() {
        return Err(MangumError::InvalidDescriptor(format!(
            "code_dir '{}' does not exist",
            code_dir.display()
        ))
        .into());
    }

    // Resolve `.`/`..` in code_dir so it can be compared with the output dirs.
    let code_dir = fs::canonicalize(&code_dir)
        .with_context(|| format!("resolve {}", code_dir.display()))?;
    let resolved = ProjectLayout {
        root: fs::canonicalize(&layout.root)
            .with_context(|| format!("resolve {}", layout.root.display()))?,
    };
    let build_dir = resolved.build_dir();
    if code_dir.starts_with(&build_dir) {
        return Err(MangumError::InvalidDescriptor(format!(
            "code_dir '{}' cannot be inside the build directory",
            descriptor.code_dir
        ))
        .into());
    }

    if no_pip {
        tracing::info!("skipping requirements, updating application code only");
        fs::create_dir_all(&build_dir)
            .with_context(|| format!("create {}", build_dir.display()))?;
    } else {
        if build_dir.exists() {
            fs::remove_dir_all(&build_dir)
                .with_context(|| format!("remove {}", build_dir.display()))?;
        }
        fs::create_dir_all(&build_dir)
            .with_context(|| format!("create {}", build_dir.display()))?;
        install_requirements(&layout.requirements(), &build_dir)?;
    }

    let skip = [build_dir.clone(), resolved.artifacts_dir()];
    let copied = copy_code(&code_dir, &build_dir, &skip)?;
    println!("Build complete: {} ({copied} files from {})", build_dir.display(), descriptor.code_dir);
    Ok(())
}

fn install_requirements(requirements: &Path, target: &Path) -> Result<()> {
    if !requirements.is_file() {
        tracing::warn!(path = %requirements.display(), "no requirements file, skipping pip");
        return Ok(());
    }
    let pip = std::env::var("MANGUM_PIP").unwrap_or_else(|_| "pip".to_string());
    println!("Installing requirements...");
    let status = Command::new(&pip)
        .arg("install")
        .arg("-r")
        .arg(requirements)
        .arg("-t")
        .arg(target)
        .arg("--upgrade")
        .status()
        .with_context(|| format!("failed to run `{pip} install` (is pip installed?)"))?;
    if !status.success() {
        return Err(MangumError::provider(
            "pip install",
            format!("exited with {status}"),
        )
        .into());
    }
    Ok(())
}

fn is_bytecode(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    (entry.file_type().is_dir() && name == "__pycache__")
        || (entry.file_type().is_file() && name.ends_with(".pyc"))
}

/// Copies `src` into `dst`, overwriting files that already exist and leaving
/// out anything under `skip`. Returns the number of files copied.
fn copy_code(src: &Path, dst: &Path, skip: &[PathBuf]) -> Result<usize> {
    let mut copied = 0;
    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_bytecode(e) && !skip.iter().any(|s| e.path() == s));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("strip prefix {}", src.display()))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} -> {}", entry.path().display(), target.display())
            })?;
            copied += 1;
        }
    }
    tracing::debug!(copied, src = %src.display(), "copied application code");
    Ok(copied)
}
