//! Registry manifest lookups over the distribution HTTP API

use crate::{ProviderError, Result};
use hugodev_config::is_registry_host;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};

const DOCKER_HUB_REGISTRY: &str = "registry-1.docker.io";
const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const CONTENT_DIGEST: &str = "Docker-Content-Digest";

/// A parsed `registry/namespace/repo[:tag]` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    name: String,
    registry: String,
    repository: String,
    tag: String,
}

impl ImageReference {
    /// Parse an image reference, resolving bare names against Docker Hub
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ProviderError::ValidationError(
                "image reference must not be empty".into(),
            ));
        }
        if reference.contains('@') {
            return Err(ProviderError::ValidationError(format!(
                "{}: digest-pinned references cannot be checked for updates",
                reference
            )));
        }

        let (name, tag) = hugodev_config::split_tag(reference);
        let tag = tag.unwrap_or("latest");
        if tag.is_empty() || name.is_empty() || name.ends_with('/') {
            return Err(ProviderError::ValidationError(format!(
                "{}: malformed image reference",
                reference
            )));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => {
                (first.to_string(), rest.to_string())
            }
            Some(_) => (DOCKER_HUB_REGISTRY.to_string(), name.to_string()),
            None => (DOCKER_HUB_REGISTRY.to_string(), format!("library/{}", name)),
        };

        Ok(Self {
            name: name.to_string(),
            registry,
            repository,
            tag: tag.to_string(),
        })
    }

    /// Repository name as written, without the tag
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// `https://<registry>/v2/<repository>/manifests/<tag>`
    pub fn manifest_url(&self) -> String {
        format!("https://{}{}", self.registry, self.manifest_path())
    }

    pub fn manifest_path(&self) -> String {
        format!("/v2/{}/manifests/{}", self.repository, self.tag)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let params = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest,
            _ => {
                return Err(ProviderError::AuthError(format!(
                    "unsupported authentication challenge: {}",
                    header
                )))
            }
        };

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for (key, value) in challenge_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        let realm = realm
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ProviderError::AuthError("bearer challenge has no realm".into()))?;

        Ok(Self {
            realm,
            service,
            scope,
        })
    }
}

/// Split `k1="v1",k2=v2` into pairs; commas inside quotes belong to the value
fn challenge_params(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() && chars.peek().is_none() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => value.push(c),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }

        let key = key.trim();
        if !key.is_empty() {
            pairs.push((key.to_string(), value.trim().to_string()));
        }
        if chars.peek().is_none() {
            break;
        }
    }

    pairs
}

/// Registry capability: current manifest digest for a tag
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn manifest_digest(&self, reference: &ImageReference) -> Result<String>;
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

impl TokenResponse {
    fn into_token(self) -> Result<String> {
        self.token
            .or(self.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::AuthError("token response contained no token".into()))
    }
}

/// reqwest-backed registry client with anonymous bearer token support
pub struct HttpRegistry {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpRegistry {
    pub fn new() -> Result<Self> {
        Self::build(None)
    }

    /// Send every manifest lookup to `endpoint` (`scheme://host[:port]`)
    /// rather than the registry named in the reference
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        Self::build(Some(endpoint.into()))
    }

    fn build(endpoint: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hugodev/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, endpoint })
    }

    fn manifest_url(&self, reference: &ImageReference) -> String {
        match &self.endpoint {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), reference.manifest_path()),
            None => reference.manifest_url(),
        }
    }

    async fn get_manifest(&self, url: &str, token: Option<&str>) -> Result<reqwest::Response> {
        let mut request = self.client.get(url).header(ACCEPT, MANIFEST_V2);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(request.send().await?)
    }

    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String> {
        let mut query = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope.as_str()));
        }

        tracing::debug!("Requesting registry token from {}", challenge.realm);
        let response = self
            .client
            .get(&challenge.realm)
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::AuthError(format!(
                "token endpoint {} returned {}",
                challenge.realm,
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::AuthError(format!("invalid token response: {}", e)))?;

        body.into_token()
    }
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    async fn manifest_digest(&self, reference: &ImageReference) -> Result<String> {
        let url = self.manifest_url(reference);
        tracing::debug!("Fetching manifest {}", url);

        let mut response = self.get_manifest(&url, None).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let header = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    ProviderError::AuthError(format!("{} requires authorization", url))
                })?;
            let challenge = BearerChallenge::parse(header)?;
            let token = self.fetch_token(&challenge).await?;

            response = self.get_manifest(&url, Some(&token)).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(ProviderError::AuthError(format!(
                    "{} rejected the bearer token",
                    url
                )));
            }
        }

        check_status(response.status(), reference)?;

        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(manifest_digest_from(&headers, &body))
    }
}

fn check_status(status: StatusCode, reference: &ImageReference) -> Result<()> {
    if status == StatusCode::OK {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(ProviderError::NotFound(format!(
            "manifest for {} not found on {}",
            reference,
            reference.registry()
        )))
    } else {
        Err(ProviderError::RegistryError(format!(
            "{} returned {} for {}",
            reference.registry(),
            status,
            reference
        )))
    }
}

/// Digest from the `Docker-Content-Digest` header, or the body hash
fn manifest_digest_from(headers: &HeaderMap, body: &[u8]) -> String {
    if let Some(digest) = headers
        .get(CONTENT_DIGEST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        return digest.to_string();
    }

    tracing::debug!("No {} header, hashing manifest body", CONTENT_DIGEST);
    format!("sha256:{}", hex::encode(Sha256::digest(body)))
}
