//! Prebuilt development environments and their Dockerfile stages

use crate::{CoreError, Result};
use std::fmt;
use std::str::FromStr;

/// A named development environment with its own image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevEnvironment {
    AuthorDev,
    AdminDev,
}

impl DevEnvironment {
    pub const ALL: [DevEnvironment; 2] = [Self::AuthorDev, Self::AdminDev];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorDev => "author-dev",
            Self::AdminDev => "admin-dev",
        }
    }

    /// Local image repository name for this environment
    pub fn image_name(&self) -> &'static str {
        match self {
            Self::AuthorDev => "fortinet-hugo",
            Self::AdminDev => "hugotester",
        }
    }

    /// Dockerfile stage built for this environment
    pub fn build_target(&self) -> &'static str {
        match self {
            Self::AuthorDev => "prod",
            Self::AdminDev => "dev",
        }
    }
}

impl fmt::Display for DevEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DevEnvironment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|env| env.as_str() == s)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "unknown environment '{}' (expected author-dev or admin-dev)",
                    s
                ))
            })
    }
}

/// Find the branch pinned by the `ADD https://...#<branch>` line of a stage.
///
/// The stage starts at a `FROM base as <stage>` line (case-insensitive) and
/// ends at the next `FROM`.
pub fn extract_branch_by_stage(dockerfile: &str, stage: &str) -> Result<String> {
    let header = format!("from base as {}", stage.to_ascii_lowercase());
    let mut in_stage = false;

    for line in dockerfile.lines().map(str::trim) {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words
            .first()
            .is_some_and(|w| w.eq_ignore_ascii_case("from"))
        {
            in_stage = words.join(" ").to_ascii_lowercase() == header;
            continue;
        }
        if in_stage {
            if let Some(branch) = add_url_fragment(&words) {
                return Ok(branch.to_string());
            }
        }
    }

    Err(CoreError::Validation(format!(
        "no branch found in Dockerfile for stage '{}'",
        stage
    )))
}

fn add_url_fragment<'a>(words: &[&'a str]) -> Option<&'a str> {
    let (add, url) = (words.first()?, words.get(1)?);
    if !add.eq_ignore_ascii_case("add") {
        return None;
    }
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return None;
    }
    let (_, fragment) = url.split_once('#')?;
    if fragment.is_empty() {
        None
    } else {
        Some(fragment)
    }
}
