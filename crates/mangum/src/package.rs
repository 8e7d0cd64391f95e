use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::aws;
use crate::config::Descriptor;
use crate::error::MangumError;
use crate::project::ProjectLayout;
use crate::state::{self, DeployState, PackageRecord};
use crate::template::{self, CodeLocation};

/// Zips the build, uploads it, and renders the template pointing at the upload.
pub async fn package(
    layout: &ProjectLayout,
    descriptor: &Descriptor,
    profile: Option<&str>,
) -> Result<()> {
    let name = descriptor.stack_name()?;
    let bucket = descriptor.bucket()?.to_string();
    let build_dir = layout.build_dir();
    let archive_path = layout.archive(name);

    let entries = create_archive(&build_dir, &archive_path)?;
    let body = fs::read(&archive_path)
        .with_context(|| format!("read {}", archive_path.display()))?;
    let sha256 = hex::encode(Sha256::digest(&body));
    let code = CodeLocation {
        bucket: bucket.clone(),
        key: format!("{name}/{sha256}.zip"),
    };
    println!("Packaged {entries} entries into {}", archive_path.display());

    let shared = aws::sdk_config(profile, descriptor.region_name.as_deref()).await;
    let s3 = aws_sdk_s3::Client::new(&shared);
    println!("Uploading to s3://{}/{}", code.bucket, code.key);
    s3.put_object()
        .bucket(&code.bucket)
        .key(&code.key)
        .body(aws_sdk_s3::primitives::ByteStream::from(body))
        .content_type("application/zip")
        .send()
        .await
        .map_err(|e| {
            MangumError::provider("put_object", aws_sdk_s3::error::DisplayErrorContext(&e).to_string())
        })?;

    let rendered = template::render(descriptor, &code);
    let template_path = layout.template();
    state::save_json(&template_path, &rendered)?;

    let mut st: DeployState = state::load_json(&layout.state())?;
    st.package = Some(PackageRecord {
        bucket: code.bucket,
        key: code.key,
        sha256,
        template: template_path
            .strip_prefix(&layout.root)
            .unwrap_or(template_path.as_path())
            .to_string_lossy()
            .into_owned(),
        packaged_at: Some(state::now_rfc3339()),
    });
    state::save_json(&layout.state(), &st)?;
    println!("Template written to {}", template_path.display());
    Ok(())
}

/// Writes every file under `src` into a zip at `dest`. Entries are sorted and
/// timestamps fixed so unchanged builds produce identical archives.
pub fn create_archive(src: &Path, dest: &Path) -> Result<usize> {
    let is_empty = match fs::read_dir(src) {
        Ok(mut it) => it.next().is_none(),
        Err(_) => true,
    };
    if is_empty {
        return Err(MangumError::EmptyBuild(src.to_path_buf()).into());
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    let file = File::create(dest).with_context(|| format!("create {}", dest.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let mut entries = 0;
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("strip prefix {}", src.display()))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)
                .with_context(|| format!("add directory {}", rel.display()))?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)
                .with_context(|| format!("add file {}", rel.display()))?;
            let mut f = File::open(entry.path())
                .with_context(|| format!("open {}", entry.path().display()))?;
            io::copy(&mut f, &mut zip)
                .with_context(|| format!("compress {}", entry.path().display()))?;
        } else {
            continue;
        }
        entries += 1;
    }

    zip.finish().context("finish zip archive")?;
    tracing::debug!(entries, archive = %dest.display(), "created archive");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tree(root: &Path) {
        fs::create_dir_all(root.join("app").join("routes")).unwrap();
        fs::write(root.join("app").join("asgi.py"), "handler = None\n").unwrap();
        fs::write(root.join("app").join("routes").join("items.py"), "ITEMS = []\n").unwrap();
    }

    #[test]
    fn archive_contains_relative_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let build = tmp.path().join("build");
        build_tree(&build);
        let dest = tmp.path().join(".mangum").join("shop.zip");

        let n = create_archive(&build, &dest).unwrap();
        assert_eq!(n, 4);

        let archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort();
        assert_eq!(names, ["app/", "app/asgi.py", "app/routes/", "app/routes/items.py"]);
    }

    #[test]
    fn unchanged_build_produces_identical_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let build = tmp.path().join("build");
        build_tree(&build);

        let a = tmp.path().join("a.zip");
        let b = tmp.path().join("b.zip");
        create_archive(&build, &a).unwrap();
        create_archive(&build, &b).unwrap();
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }

    #[test]
    fn empty_build_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let build = tmp.path().join("build");
        fs::create_dir_all(&build).unwrap();

        let err = create_archive(&build, &tmp.path().join("x.zip")).unwrap_err();
        assert!(err.to_string().contains("mangum build"));
        assert!(create_archive(&tmp.path().join("nope"), &tmp.path().join("x.zip")).is_err());
    }
}
