use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::PathBuf;

use crate::aws;
use crate::build;
use crate::config::{Descriptor, DEFAULT_RUNTIME};
use crate::package;
use crate::project::{self, ProjectLayout};
use crate::stack;

#[derive(Debug, Parser)]
#[command(name = "mangum", version, about = "Deploy ASGI applications to AWS Lambda")]
pub struct RootCmd {
    /// Project directory containing `mangum.yml` (defaults to the current directory)
    #[arg(long, global = true, env = "MANGUM_PROJECT")]
    pub project: Option<PathBuf>,

    /// AWS shared-config profile
    #[arg(long, global = true, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new deployment configuration (`mangum.yml`)
    Init {
        /// Project name; also the CloudFormation stack name and resource prefix
        name: String,

        /// S3 bucket that will hold the application build
        bucket_name: Option<String>,

        /// Region to deploy into
        region_name: Option<String>,

        /// Lambda runtime identifier
        #[arg(default_value = DEFAULT_RUNTIME)]
        runtime: String,

        /// Grant the function full S3 access
        #[arg(long, overrides_with = "no_s3_access")]
        s3_access: bool,

        /// Deny the function S3 access
        #[arg(long, overrides_with = "s3_access")]
        no_s3_access: bool,

        /// Grant the function full DynamoDB access
        #[arg(long, overrides_with = "no_dynamodb_access")]
        dynamodb_access: bool,

        /// Deny the function DynamoDB access
        #[arg(long, overrides_with = "dynamodb_access")]
        no_dynamodb_access: bool,
    },

    /// Create a local build
    Build {
        /// Update only the application code, keep installed requirements
        #[arg(long)]
        no_pip: bool,
    },

    /// Create a new S3 bucket for application builds
    CreateBucket {
        bucket_name: Option<String>,
        region_name: Option<String>,
    },

    /// Package the local build and upload it
    Package,

    /// Deploy the packaged project, then describe it
    Deploy,

    /// Build, package, deploy and describe
    All {
        #[arg(long)]
        no_pip: bool,
    },

    /// Validate the CloudFormation template
    Validate,

    /// Delete the CloudFormation stack
    Delete,

    /// Show the stack status and endpoints
    Describe,

    /// Generate or install shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: clap_complete::Shell,

        /// Install into this file instead of printing to stdout
        path: Option<PathBuf>,

        /// Append to `path` instead of overwriting it
        #[arg(long, requires = "path")]
        append: bool,
    },
}

/// Every lifecycle command starts here, so a missing or malformed descriptor
/// stops it before any AWS call.
fn load(project_override: Option<PathBuf>) -> Result<(ProjectLayout, Descriptor)> {
    let layout = project::load_layout(project_override)?;
    let descriptor = layout.load_descriptor()?;
    Ok((layout, descriptor))
}

pub async fn run(root: RootCmd) -> Result<()> {
    let profile = root.profile.as_deref();
    match root.cmd {
        Command::Init {
            name,
            bucket_name,
            region_name,
            runtime,
            s3_access,
            no_s3_access,
            dynamodb_access,
            no_dynamodb_access,
        } => {
            let layout = project::load_layout(root.project)?;
            let descriptor = Descriptor {
                bucket_name,
                region_name,
                runtime,
                s3_access: s3_access || !no_s3_access,
                dynamodb_access: dynamodb_access || !no_dynamodb_access,
                ..Descriptor::new(name)
            };
            project::init_project(&layout, &descriptor)
        }
        Command::CreateBucket {
            bucket_name,
            region_name,
        } => aws::create_bucket(profile, bucket_name, region_name).await,
        Command::Completion {
            shell,
            path,
            append,
        } => {
            let mut cmd = RootCmd::command();
            match path {
                None => {
                    clap_complete::generate(shell, &mut cmd, "mangum", &mut std::io::stdout());
                }
                Some(path) => {
                    let mut file = OpenOptions::new()
                        .create(true)
                        .write(true)
                        .append(append)
                        .truncate(!append)
                        .open(&path)
                        .with_context(|| format!("open {}", path.display()))?;
                    clap_complete::generate(shell, &mut cmd, "mangum", &mut file);
                    println!("{shell} completion installed in {}", path.display());
                }
            }
            Ok(())
        }
        Command::Build { no_pip } => {
            let (layout, descriptor) = load(root.project)?;
            build::build(&layout, &descriptor, no_pip)
        }
        Command::Package => {
            let (layout, descriptor) = load(root.project)?;
            package::package(&layout, &descriptor, profile).await
        }
        Command::Deploy => {
            let (layout, descriptor) = load(root.project)?;
            stack::deploy(&layout, &descriptor, profile).await?;
            stack::describe(&layout, &descriptor, profile).await
        }
        Command::All { no_pip } => {
            let (layout, descriptor) = load(root.project)?;
            descriptor.stack_name()?;
            build::build(&layout, &descriptor, no_pip)?;
            package::package(&layout, &descriptor, profile).await?;
            stack::deploy(&layout, &descriptor, profile).await?;
            stack::describe(&layout, &descriptor, profile).await
        }
        Command::Validate => {
            let (layout, descriptor) = load(root.project)?;
            stack::validate(&layout, &descriptor, profile).await
        }
        Command::Delete => {
            let (layout, descriptor) = load(root.project)?;
            stack::delete(&layout, &descriptor, profile).await
        }
        Command::Describe => {
            let (layout, descriptor) = load(root.project)?;
            stack::describe(&layout, &descriptor, profile).await
        }
    }
}
