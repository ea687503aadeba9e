//! Environment image commands

use anyhow::{Context, Result};
use hugodev_config::with_registry_prefix;
use hugodev_core::{
    build_environment_image, extract_branch_by_stage, pull_and_tag, DevEnvironment,
};
use hugodev_provider::{ContainerProvider, ImageReference};
use std::path::Path;

use super::progress_printer;

/// Pull the prebuilt image for `env` from `registry_prefix` and tag it locally
pub async fn pull_image(
    provider: &dyn ContainerProvider,
    env: &str,
    registry_prefix: &str,
) -> Result<()> {
    let env: DevEnvironment = env.parse()?;
    let remote = with_registry_prefix(registry_prefix, &format!("{}:latest", env.image_name()));
    let reference = ImageReference::parse(&remote)?;

    let (tx, printer) = progress_printer();
    let result = pull_and_tag(provider, &reference, env.image_name(), Some(&tx)).await;
    drop(tx);
    let _ = printer.await;

    result.with_context(|| format!("Failed to pull {} image {}", env, reference))?;
    println!("Pulled {} as {}:latest", reference, env.image_name());
    Ok(())
}

/// Check that `context` holds a Dockerfile with a stage for `env`.
///
/// Returns the central repository branch the stage builds from.
pub fn check_build_context(env: DevEnvironment, context: &Path) -> Result<String> {
    let dockerfile = context.join("Dockerfile");
    if !dockerfile.is_file() {
        anyhow::bail!(
            "Can't find a Dockerfile in {}. Run this command from the repository root.",
            context.display()
        );
    }
    let content = std::fs::read_to_string(&dockerfile)
        .with_context(|| format!("Failed to read {}", dockerfile.display()))?;
    Ok(extract_branch_by_stage(&content, env.build_target())?)
}

/// Build the image for `env` from the Dockerfile in `context`
pub async fn build_image(
    provider: &dyn ContainerProvider,
    env: DevEnvironment,
    context: &Path,
    hugo_version: &str,
) -> Result<()> {
    let (tx, printer) = progress_printer();
    let result = build_environment_image(provider, env, context, hugo_version, Some(&tx)).await;
    drop(tx);
    let _ = printer.await;

    let build = result.with_context(|| format!("Failed to build the {} image", env))?;
    println!(
        "Built {} ({}) from the {} branch of the central repository",
        build.tag,
        build.image,
        build.branch
    );
    Ok(())
}
