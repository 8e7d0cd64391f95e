use anyhow::{Context, Result};
use aws_config::SdkConfig;
use aws_types::region::Region;

/// Shared SDK configuration; falls back to the default provider chain for
/// anything not given explicitly.
pub async fn sdk_config(profile: Option<&str>, region: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::from_env();
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    loader.load().await
}

pub fn generate_bucket_name() -> String {
    format!("mangum-{}", uuid::Uuid::new_v4())
}

/// Creates a code bucket. Provider failures are printed rather than returned.
pub async fn create_bucket(
    profile: Option<&str>,
    bucket_name: Option<String>,
    region_name: Option<String>,
) -> Result<()> {
    let bucket_name = match bucket_name {
        Some(name) => name,
        None => {
            println!("No bucket name provided, one will be generated.");
            generate_bucket_name()
        }
    };

    let shared = sdk_config(profile, region_name.as_deref()).await;
    let region_name = match region_name {
        Some(region) => region,
        None => {
            let region = shared
                .region()
                .map(|r| r.to_string())
                .context("no default region configured (pass region_name or set AWS_REGION)")?;
            println!("No region specified, using default.");
            region
        }
    };

    let s3 = aws_sdk_s3::Client::new(&shared);
    let mut req = s3.create_bucket().bucket(&bucket_name);
    // us-east-1 rejects an explicit location constraint.
    if region_name != "us-east-1" {
        req = req.create_bucket_configuration(
            aws_sdk_s3::types::CreateBucketConfiguration::builder()
                .location_constraint(aws_sdk_s3::types::BucketLocationConstraint::from(
                    region_name.as_str(),
                ))
                .build(),
        );
    }

    match req.send().await {
        Ok(_) => {
            tracing::info!(bucket = %bucket_name, region = %region_name, "created bucket");
            println!("Bucket name:\n{bucket_name}\nRegion name:\n{region_name}");
        }
        Err(e) => {
            let msg = aws_sdk_s3::error::DisplayErrorContext(&e).to_string();
            tracing::warn!(bucket = %bucket_name, error = %msg, "create_bucket failed");
            println!("{msg}");
        }
    }
    Ok(())
}
