//! Image pulls, retags and environment builds

use crate::{extract_branch_by_stage, CoreError, DevEnvironment, Result};
use hugodev_provider::{BuildConfig, ContainerProvider, ImageId, ImageReference};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::mpsc;

/// Base images an environment build needs before the Dockerfile runs
const DOCKERFILE_FRONTEND: &str = "docker/dockerfile:1.5-labs";
const HUGO_BASE_IMAGE: &str = "docker.io/hugomods/hugo";

pub(crate) fn send_progress(progress: Option<&mpsc::UnboundedSender<String>>, msg: &str) {
    if let Some(tx) = progress {
        let _ = tx.send(msg.to_string());
    }
}

/// Pull `remote` and retag it as `local_name:<tag>`
pub async fn pull_and_tag(
    provider: &dyn ContainerProvider,
    remote: &ImageReference,
    local_name: &str,
    progress: Option<&mpsc::UnboundedSender<String>>,
) -> Result<()> {
    let source = remote.to_string();
    send_progress(progress, &format!("Pulling {}...", source));
    provider.pull(&source, progress).await?;

    tracing::info!("Tagging {} as {}:{}", source, local_name, remote.tag());
    provider.tag_image(&source, local_name, remote.tag()).await?;
    send_progress(
        progress,
        &format!("Image {} is available as {}:{}", source, local_name, remote.tag()),
    );
    Ok(())
}

/// Outcome of an environment image build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentBuild {
    pub image: ImageId,
    pub tag: String,
    /// Branch of the central repository baked into the image
    pub branch: String,
}

/// Build the image for `env` from the Dockerfile in `context`
pub async fn build_environment_image(
    provider: &dyn ContainerProvider,
    env: DevEnvironment,
    context: &Path,
    hugo_version: &str,
    progress: Option<&mpsc::UnboundedSender<String>>,
) -> Result<EnvironmentBuild> {
    let dockerfile = context.join("Dockerfile");
    let content = std::fs::read_to_string(&dockerfile).map_err(|e| {
        CoreError::Validation(format!("can't read {}: {}", dockerfile.display(), e))
    })?;
    let branch = extract_branch_by_stage(&content, env.build_target())?;

    let hugo_image = format!("{}:{}", HUGO_BASE_IMAGE, hugo_version);
    for image in [DOCKERFILE_FRONTEND, hugo_image.as_str()] {
        send_progress(progress, &format!("Ensuring required image {} is available...", image));
        provider.pull(image, progress).await?;
    }

    let tag = format!("{}:latest", env.image_name());
    send_progress(
        progress,
        &format!("Building a {} image named {}", env, tag),
    );

    let config = BuildConfig {
        context: context.to_path_buf(),
        dockerfile: "Dockerfile".to_string(),
        tag: tag.clone(),
        target: Some(env.build_target().to_string()),
        build_args: HashMap::from([("BUILDKIT_INLINE_CACHE".to_string(), "1".to_string())]),
    };
    let image = provider.build(&config, progress).await?;

    tracing::info!("Built {} ({}) from branch {}", tag, image, branch);
    Ok(EnvironmentBuild { image, tag, branch })
}
