use anyhow::{Context, Result};
use aws_sdk_cloudformation::error::DisplayErrorContext;
use aws_sdk_cloudformation::types::{Capability, Stack};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use crate::aws;
use crate::config::Descriptor;
use crate::error::MangumError;
use crate::project::ProjectLayout;
use crate::state::{self, DeployState, PackageRecord, StackRecord};
use crate::template::{self, CodeLocation};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const PLACEHOLDER_KEY: &str = "unpackaged.zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
    InProgress,
    Succeeded,
    Failed,
}

pub fn classify(status: &str) -> StackPhase {
    if status.ends_with("_IN_PROGRESS") {
        StackPhase::InProgress
    } else if status.ends_with("ROLLBACK_COMPLETE") || status.ends_with("_FAILED") {
        StackPhase::Failed
    } else if status.ends_with("_COMPLETE") {
        StackPhase::Succeeded
    } else {
        StackPhase::Failed
    }
}

fn is_missing_stack(message: &str) -> bool {
    message.contains("does not exist")
}

fn is_no_op_update(message: &str) -> bool {
    message.contains("No updates are to be performed")
}

/// An update with nothing to change only counts as deployed when the stack
/// already sits in a completed state.
fn check_unchanged(stack_name: &str, status: &str) -> Result<(), MangumError> {
    if classify(status) == StackPhase::Succeeded {
        return Ok(());
    }
    Err(MangumError::provider(
        "update_stack",
        format!(
            "stack {stack_name} was already rolled back ({status}) and the template is unchanged; \
             fix the application and run `mangum package` again"
        ),
    ))
}

/// The code location a rendered template points at: the last upload, or a
/// placeholder under the configured bucket when nothing is packaged yet.
pub fn code_location(descriptor: &Descriptor, package: Option<&PackageRecord>) -> CodeLocation {
    match package {
        Some(p) => CodeLocation {
            bucket: p.bucket.clone(),
            key: p.key.clone(),
        },
        None => CodeLocation {
            bucket: descriptor
                .bucket_name
                .clone()
                .unwrap_or_else(|| "mangum-placeholder".to_string()),
            key: format!("{}/{PLACEHOLDER_KEY}", descriptor.name),
        },
    }
}

fn status_of(stack: &Stack) -> String {
    stack
        .stack_status()
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

fn outputs_of(stack: &Stack) -> BTreeMap<String, String> {
    stack
        .outputs()
        .iter()
        .filter_map(|o| Some((o.output_key()?.to_string(), o.output_value()?.to_string())))
        .collect()
}

async fn client(descriptor: &Descriptor, profile: Option<&str>) -> aws_sdk_cloudformation::Client {
    let shared = aws::sdk_config(profile, descriptor.region_name.as_deref()).await;
    aws_sdk_cloudformation::Client::new(&shared)
}

async fn find_stack(cf: &aws_sdk_cloudformation::Client, name_or_id: &str) -> Result<Option<Stack>> {
    match cf.describe_stacks().stack_name(name_or_id).send().await {
        Ok(out) => Ok(out.stacks().first().cloned()),
        Err(e) => {
            let msg = DisplayErrorContext(&e).to_string();
            if is_missing_stack(&msg) {
                Ok(None)
            } else {
                Err(MangumError::provider("describe_stacks", msg).into())
            }
        }
    }
}

/// Polls until the stack leaves its in-progress state. `None` means the stack
/// no longer exists.
async fn wait_stack(cf: &aws_sdk_cloudformation::Client, stack_id: &str) -> Result<Option<Stack>> {
    let mut waited = Duration::from_secs(0);
    loop {
        let stack = match find_stack(cf, stack_id).await? {
            Some(stack) => stack,
            None => return Ok(None),
        };
        let status = status_of(&stack);
        match classify(&status) {
            StackPhase::Succeeded => return Ok(Some(stack)),
            StackPhase::Failed => {
                let reason = stack.stack_status_reason().unwrap_or("no reason given");
                return Err(MangumError::provider(
                    "stack operation",
                    format!("{stack_id} ended in {status}: {reason}"),
                )
                .into());
            }
            StackPhase::InProgress => {
                tracing::info!(stack = %stack_id, %status, "waiting for stack");
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
        waited += POLL_INTERVAL;
        if waited > WAIT_TIMEOUT {
            return Err(MangumError::provider(
                "stack operation",
                format!("{stack_id} timed out in {status}"),
            )
            .into());
        }
    }
}

fn print_outputs(outputs: &BTreeMap<String, String>) {
    if outputs.is_empty() {
        println!("(no outputs)");
        return;
    }
    for (key, value) in outputs {
        println!("{key}: {value}");
    }
}

pub async fn validate(
    layout: &ProjectLayout,
    descriptor: &Descriptor,
    profile: Option<&str>,
) -> Result<()> {
    descriptor.stack_name()?;

    let st: DeployState = state::load_json(&layout.state())?;
    let code = code_location(descriptor, st.package.as_ref());
    let body = serde_json::to_string(&template::render(descriptor, &code))
        .context("serialize template")?;

    let cf = client(descriptor, profile).await;
    let out = cf
        .validate_template()
        .template_body(body)
        .send()
        .await
        .map_err(|e| MangumError::provider("validate_template", DisplayErrorContext(&e).to_string()))?;

    println!("Template is valid.");
    if let Some(description) = out.description() {
        println!("  description:  {description}");
    }
    if !out.capabilities().is_empty() {
        let caps: Vec<&str> = out.capabilities().iter().map(|c| c.as_str()).collect();
        println!("  capabilities: {}", caps.join(", "));
    }
    Ok(())
}

pub async fn deploy(
    layout: &ProjectLayout,
    descriptor: &Descriptor,
    profile: Option<&str>,
) -> Result<()> {
    let stack_name = descriptor.stack_name()?;
    let mut st: DeployState = state::load_json(&layout.state())?;
    let package = st.package.clone().ok_or(MangumError::NotPackaged)?;
    let template_path = layout.root.join(&package.template);
    let body = fs::read_to_string(&template_path)
        .with_context(|| format!("read {}", template_path.display()))?;

    let cf = client(descriptor, profile).await;
    let existing = find_stack(&cf, stack_name).await?;

    let stack_id = match existing {
        None => {
            println!("Creating stack {stack_name}");
            let out = cf
                .create_stack()
                .stack_name(stack_name)
                .template_body(body)
                .capabilities(Capability::CapabilityIam)
                .capabilities(Capability::CapabilityNamedIam)
                .send()
                .await
                .map_err(|e| MangumError::provider("create_stack", DisplayErrorContext(&e).to_string()))?;
            out.stack_id().unwrap_or(stack_name).to_string()
        }
        Some(stack) => {
            let status = status_of(&stack);
            if status == "ROLLBACK_COMPLETE" {
                anyhow::bail!(
                    "stack {stack_name} is in ROLLBACK_COMPLETE and cannot be updated (run `mangum delete` first)"
                );
            }
            let stack_id = stack.stack_id().unwrap_or(stack_name).to_string();
            println!("Updating stack {stack_name}");
            let res = cf
                .update_stack()
                .stack_name(&stack_id)
                .template_body(body)
                .capabilities(Capability::CapabilityIam)
                .capabilities(Capability::CapabilityNamedIam)
                .send()
                .await;
            if let Err(e) = res {
                let msg = DisplayErrorContext(&e).to_string();
                if !is_no_op_update(&msg) {
                    return Err(MangumError::provider("update_stack", msg).into());
                }
                check_unchanged(stack_name, &status)?;
                println!("No changes to deploy.");
            }
            stack_id
        }
    };

    let stack = wait_stack(&cf, &stack_id)
        .await?
        .with_context(|| format!("stack {stack_name} disappeared while deploying"))?;
    let status = status_of(&stack);
    println!("Stack {stack_name}: {status}");

    st.stack = Some(StackRecord {
        stack_id: Some(stack_id),
        status: Some(status),
        deployed_at: Some(state::now_rfc3339()),
        outputs: outputs_of(&stack),
    });
    state::save_json(&layout.state(), &st)?;
    Ok(())
}

pub async fn describe(
    layout: &ProjectLayout,
    descriptor: &Descriptor,
    profile: Option<&str>,
) -> Result<()> {
    let stack_name = descriptor.stack_name()?;
    let cf = client(descriptor, profile).await;
    let stack = find_stack(&cf, stack_name).await?.ok_or_else(|| {
        MangumError::provider("describe_stacks", format!("stack {stack_name} does not exist"))
    })?;

    let status = status_of(&stack);
    let outputs = outputs_of(&stack);
    println!("Stack:  {stack_name}");
    println!("Status: {status}");
    print_outputs(&outputs);

    let mut st: DeployState = state::load_json(&layout.state())?;
    let record = st.stack.get_or_insert_with(StackRecord::default);
    record.stack_id = stack.stack_id().map(str::to_string);
    record.status = Some(status);
    record.outputs = outputs;
    state::save_json(&layout.state(), &st)?;
    Ok(())
}

pub async fn delete(
    layout: &ProjectLayout,
    descriptor: &Descriptor,
    profile: Option<&str>,
) -> Result<()> {
    let stack_name = descriptor.stack_name()?;
    let cf = client(descriptor, profile).await;

    let stack = match find_stack(&cf, stack_name).await? {
        Some(stack) => stack,
        None => {
            println!("Stack {stack_name} does not exist.");
            return Ok(());
        }
    };
    let stack_id = stack.stack_id().unwrap_or(stack_name).to_string();

    println!("Deleting stack {stack_name}");
    cf.delete_stack()
        .stack_name(&stack_id)
        .send()
        .await
        .map_err(|e| MangumError::provider("delete_stack", DisplayErrorContext(&e).to_string()))?;
    wait_stack(&cf, &stack_id).await?;
    println!("Stack {stack_name} deleted.");

    let mut st: DeployState = state::load_json(&layout.state())?;
    if st.stack.take().is_some() {
        state::save_json(&layout.state(), &st)?;
    }
    Ok(())
}
