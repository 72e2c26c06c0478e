//! Registry HTTP client: paged tag listing and manifest digests.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, ScanError};
use crate::tags::{self, Buckets, Limits, TagRecord};

/// Floating tag pointing at the currently recommended build.
pub const RECOMMENDED_TAG: &str = "recommended";

const MANIFEST_TYPES: &str = "application/vnd.docker.distribution.manifest.list.v2+json, \
                              application/vnd.docker.distribution.manifest.v2+json";
const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// `key="value"` pairs of an authentication challenge.
static CHALLENGE_PARAM: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#));

/// Where to look and how much to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Host serving the paged tag listing.
    pub repo_host: String,
    /// Host serving the registry v2 manifest API.
    pub registry_host: String,
    pub owner: String,
    pub name: String,
    /// Plain HTTP instead of HTTPS.
    pub insecure: bool,
    pub limits: Limits,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            repo_host: "hub.docker.com".to_string(),
            registry_host: "registry.hub.docker.com".to_string(),
            owner: "lsstsqre".to_string(),
            name: "jld-lab".to_string(),
            insecure: false,
            limits: Limits::default(),
        }
    }
}

impl ScanConfig {
    fn scheme(&self) -> &'static str {
        if self.insecure {
            "http"
        } else {
            "https"
        }
    }

    #[must_use]
    pub fn tags_url(&self) -> String {
        format!(
            "{}://{}/v2/repositories/{}/{}/tags",
            self.scheme(),
            self.repo_host,
            self.owner,
            self.name
        )
    }

    #[must_use]
    pub fn manifest_url(&self, tag: &str) -> String {
        format!(
            "{}://{}/v2/{}/{}/manifests/{tag}",
            self.scheme(),
            self.registry_host,
            self.owner,
            self.name
        )
    }

    /// Full image reference for a tag.
    #[must_use]
    pub fn image(&self, tag: &str) -> String {
        format!("{}/{}:{tag}", self.owner, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    results: Vec<TagRecord>,
    next: Option<String>,
}

/// Result of one scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scan {
    pub buckets: Buckets,
    /// Every tag name the registry listed, in listing order.
    pub tags: Vec<String>,
}

/// Outcome of resolving the recommended tag, cached per client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(String),
    NotFound,
}

impl Resolution {
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Found(tag) => Some(tag.as_str()),
            Self::NotFound => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found(tag) => write!(f, "{tag}"),
            Self::NotFound => write!(f, "NOTFOUND"),
        }
    }
}

/// Bearer challenge from a `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl Challenge {
    /// Parse `Bearer realm="...",service="...",scope="..."`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Auth`] for a non-bearer scheme or a missing
    /// realm.
    pub fn parse(header: &str) -> Result<Self> {
        let Some(params) = header
            .trim()
            .strip_prefix("Bearer ")
            .or_else(|| header.trim().strip_prefix("bearer "))
        else {
            return Err(ScanError::Auth(format!("Unsupported challenge: {header}")));
        };
        let pair = CHALLENGE_PARAM
            .as_ref()
            .map_err(|e| ScanError::Auth(format!("Invalid regex: {e}")))?;
        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for caps in pair.captures_iter(params) {
            let value = caps[2].to_string();
            match &caps[1] {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }
        let realm = realm.ok_or_else(|| ScanError::Auth(format!("No realm in: {header}")))?;
        Ok(Self {
            realm,
            service,
            scope,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Scanner for one image repository.
pub struct ScanRepo {
    config: ScanConfig,
    client: Client,
    token: Mutex<Option<String>>,
    recommended: Mutex<Option<Resolution>>,
}

impl ScanRepo {
    /// # Errors
    ///
    /// Returns [`ScanError::Http`] if the HTTP client cannot be built.
    pub fn new(config: ScanConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("nb-tagscan/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
            recommended: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    async fn get_page(&self, url: &str, page: u32) -> Result<TagPage> {
        let response = self
            .client
            .get(url)
            .query(&[("page", page)])
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ScanError::Api {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Page through the tag listing and bucket the results.
    ///
    /// # Errors
    ///
    /// Returns HTTP, status, decode or timestamp errors.
    pub async fn scan(&self) -> Result<Scan> {
        let url = self.config.tags_url();
        let mut records = Vec::new();
        let mut page = 1;
        loop {
            let listing = self.get_page(&url, page).await?;
            debug!(page, count = listing.results.len(), "Fetched tag page");
            records.extend(listing.results);
            if listing.next.as_deref().is_none_or(str::is_empty) {
                break;
            }
            page += 1;
        }
        info!(url = %url, pages = page, tags = records.len(), "Scanned repository");
        let tags = records.iter().map(|r| r.name.clone()).collect();
        let buckets = tags::partition(records, self.config.limits)?;
        Ok(Scan { buckets, tags })
    }

    async fn head_manifest(&self, url: &str) -> Result<Response> {
        let mut request = self.client.head(url).header(ACCEPT, MANIFEST_TYPES);
        if let Some(token) = self.token.lock().await.as_deref() {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    async fn fetch_token(&self, challenge: &Challenge) -> Result<String> {
        let mut query = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope.as_str()));
        }
        let response = self
            .client
            .get(&challenge.realm)
            .query(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ScanError::Api {
                status: response.status().as_u16(),
                url: challenge.realm.clone(),
            });
        }
        let body: TokenResponse = serde_json::from_str(&response.text().await?)?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| ScanError::Auth(format!("No token from {}", challenge.realm)))
    }

    /// Content digest of a tag's manifest, answering a bearer challenge
    /// once if the registry demands it.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Api`] for a failed request,
    /// [`ScanError::Auth`] if authentication cannot be negotiated and
    /// [`ScanError::MissingDigest`] if the response has no digest header.
    pub async fn manifest_digest(&self, tag: &str) -> Result<String> {
        let url = self.config.manifest_url(tag);
        let mut response = self.head_manifest(&url).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let header = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ScanError::Auth(format!("{url} sent no challenge")))?;
            let challenge = Challenge::parse(header)?;
            debug!(realm = %challenge.realm, "Fetching registry token");
            let token = self.fetch_token(&challenge).await?;
            *self.token.lock().await = Some(token);
            response = self.head_manifest(&url).await?;
        }
        if !response.status().is_success() {
            return Err(ScanError::Api {
                status: response.status().as_u16(),
                url,
            });
        }
        response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ScanError::MissingDigest(tag.to_string()))
    }

    /// Concrete tag the `recommended` tag currently points at.
    ///
    /// Candidates are the scan's bucketed tags first, then every listed
    /// tag. The answer, including "not found", is cached for the life of
    /// this client.
    ///
    /// # Errors
    ///
    /// Returns an error only if the recommended tag's own digest cannot be
    /// fetched; candidates that fail are skipped.
    pub async fn resolve_recommended(&self, scan: &Scan) -> Result<Option<String>> {
        if let Some(cached) = self.recommended.lock().await.as_ref() {
            return Ok(cached.tag().map(str::to_string));
        }
        let target = self.manifest_digest(RECOMMENDED_TAG).await?;
        let mut seen = HashSet::new();
        let candidates = scan
            .buckets
            .iter()
            .map(|r| r.name.as_str())
            .chain(scan.tags.iter().map(String::as_str));
        let mut resolution = Resolution::NotFound;
        for tag in candidates {
            if tag == RECOMMENDED_TAG || !seen.insert(tag) {
                continue;
            }
            match self.manifest_digest(tag).await {
                Ok(digest) if digest == target => {
                    resolution = Resolution::Found(tag.to_string());
                    break;
                }
                Ok(_) => {}
                Err(e) => debug!(tag, error = %e, "Skipping tag"),
            }
        }
        info!(resolved = %resolution, "Resolved recommended tag");
        let tag = resolution.tag().map(str::to_string);
        *self.recommended.lock().await = Some(resolution);
        Ok(tag)
    }
}
