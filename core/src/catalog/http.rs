// REST 目录服务客户端

use super::{CatalogClient, CatalogRecord, PolicyStatus, ScanLocation};
use crate::config::model::{ProxySettings, ServerSettings};
use crate::error::{CoreError, Result};
use crate::scanner::ScanTarget;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{ClientBuilder, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const LIST_LIMIT: &str = "100";

#[derive(Debug, Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanLocationItem {
    id: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    mapped_version_ids: Vec<String>,
}

pub struct RestCatalogClient {
    base: Url,
    http: reqwest::Client,
    token: Option<String>,
}

impl RestCatalogClient {
    /// Builds the HTTP client and authenticates: bearer token when one is
    /// configured, otherwise a form login that leaves a session cookie.
    pub async fn connect(server: &ServerSettings) -> Result<Self> {
        let base = parse_base_url(&server.url)?;

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(server.timeout_secs))
            .cookie_store(true)
            .user_agent(concat!("buildscan/", env!("CARGO_PKG_VERSION")));
        // 只使用配置中的代理，不读取 HTTP_PROXY 等环境变量
        builder = match server.proxy.as_ref().filter(|p| p.is_configured()) {
            Some(proxy) => configure_proxy(builder, proxy, base.host_str().unwrap_or_default())?,
            None => builder.no_proxy(),
        };
        let http = builder
            .build()
            .map_err(|e| CoreError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let token = server.api_token.clone().filter(|t| !t.trim().is_empty());
        let client = Self { base, http, token };

        if client.token.is_none() {
            let credentials = server.credentials.as_ref().ok_or_else(|| {
                CoreError::Configuration(
                    "No credentials could be found to connect to the server.".to_string(),
                )
            })?;
            client.login(&credentials.username, &credentials.password).await?;
        }
        Ok(client)
    }

    async fn login(&self, username: &str, password: &str) -> Result<()> {
        let url = self.endpoint(&["j_spring_security_check"])?;
        debug!("Logging in to {} as '{}'", url, username);
        let response = self
            .http
            .post(url.clone())
            .form(&[("j_username", username), ("j_password", password)])
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response, &url)?;
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                CoreError::Configuration(format!("'{}' can not be used as a server URL", self.base))
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// `None` on 404.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let response = self
            .request(Method::GET, url.clone())
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, &url)?;
        let body = response
            .json::<T>()
            .await
            .map_err(|e| CoreError::Parse(format!("Unexpected response from {}: {}", url, e)))?;
        Ok(Some(body))
    }

    async fn list<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>> {
        Ok(self
            .get_json::<ItemList<T>>(url)
            .await?
            .map(|list| list.items)
            .unwrap_or_default())
    }
}

#[async_trait]
impl CatalogClient for RestCatalogClient {
    async fn find_projects_by_name(&self, name: &str) -> Result<Vec<CatalogRecord>> {
        let mut url = self.endpoint(&["api", "v1", "projects"])?;
        url.query_pairs_mut()
            .append_pair("q", &format!("name:{}", name))
            .append_pair("limit", LIST_LIMIT);
        self.list(url).await
    }

    async fn find_versions_by_project(&self, project_id: &str) -> Result<Vec<CatalogRecord>> {
        let mut url = self.endpoint(&["api", "v1", "projects", project_id, "versions"])?;
        url.query_pairs_mut().append_pair("limit", LIST_LIMIT);
        self.list(url).await
    }

    async fn find_scan_locations(
        &self,
        host: &str,
        targets: &[ScanTarget],
        version_id: &str,
    ) -> Result<BTreeMap<ScanTarget, ScanLocation>> {
        let mut locations = BTreeMap::new();
        for target in targets {
            let path = target.absolute_path().to_string_lossy().to_string();
            let mut url = self.endpoint(&["api", "v1", "scanlocations"])?;
            url.query_pairs_mut()
                .append_pair("host", host)
                .append_pair("path", &path);

            let items: Vec<ScanLocationItem> = self.list(url).await?;
            match matching_location(items, &path) {
                Some(item) => {
                    let already_mapped = item.mapped_version_ids.iter().any(|id| id == version_id);
                    locations.insert(
                        target.clone(),
                        ScanLocation {
                            id: item.id,
                            already_mapped,
                            mapped_version_ids: item.mapped_version_ids,
                        },
                    );
                }
                None => debug!("No scan location on host '{}' for {}", host, path),
            }
        }
        Ok(locations)
    }

    async fn apply_mapping(&self, version_id: &str, scan_location_ids: &[String]) -> Result<()> {
        let url = self.endpoint(&["api", "v1", "versions", version_id, "scanlocations"])?;
        let response = self
            .request(Method::POST, url.clone())
            .json(&serde_json::json!({ "scanLocationIds": scan_location_ids }))
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == StatusCode::CONFLICT {
            // 409 表示映射已存在
            info!("Scan locations are already mapped to version {}", version_id);
            return Ok(());
        }
        check_status(response, &url)?;
        Ok(())
    }

    async fn remove_mapping(&self, version_id: &str, scan_location_id: &str) -> Result<()> {
        let url = self.endpoint(&[
            "api",
            "v1",
            "versions",
            version_id,
            "scanlocations",
            scan_location_id,
        ])?;
        let response = self
            .request(Method::DELETE, url.clone())
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Scan location {} was not mapped to version {}", scan_location_id, version_id);
            return Ok(());
        }
        check_status(response, &url)?;
        Ok(())
    }

    async fn policy_status(&self, version_id: &str) -> Result<Option<PolicyStatus>> {
        let url = self.endpoint(&["api", "v1", "versions", version_id, "policy-status"])?;
        self.get_json(url).await
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CoreError::Configuration("No server URL was provided.".to_string()));
    }
    Url::parse(raw).map_err(|e| {
        CoreError::Configuration(format!("The server URL '{}' is not a valid URL: {}", raw, e))
    })
}

/// The row whose path equals `path`. A row without a path only counts when
/// it is the single row returned.
fn matching_location(items: Vec<ScanLocationItem>, path: &str) -> Option<ScanLocationItem> {
    if items.len() == 1 && items[0].path.is_empty() {
        return items.into_iter().next();
    }
    items
        .into_iter()
        .find(|item| !item.path.is_empty() && same_path(&item.path, path))
}

fn same_path(a: &str, b: &str) -> bool {
    a.trim_end_matches(['/', '\\']) == b.trim_end_matches(['/', '\\'])
}

fn configure_proxy(
    builder: ClientBuilder,
    proxy: &ProxySettings,
    host: &str,
) -> Result<ClientBuilder> {
    if !proxy_applies(host, &proxy.no_proxy_hosts) {
        debug!("Host '{}' matches a no-proxy pattern, connecting directly", host);
        return Ok(builder.no_proxy());
    }

    let proxy_url = format!("http://{}:{}", proxy.host.trim(), proxy.port);
    let mut http_proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
        CoreError::Configuration(format!(
            "Invalid proxy '{}:{}': {}",
            proxy.host, proxy.port, e
        ))
    })?;
    if let (Some(user), Some(password)) = (&proxy.username, &proxy.password) {
        http_proxy = http_proxy.basic_auth(user, password);
    }
    info!("Using proxy: '{}' at Port: '{}'", proxy.host, proxy.port);
    Ok(builder.proxy(http_proxy))
}

/// False when `host` matches one of the no-proxy glob patterns.
pub(crate) fn proxy_applies(host: &str, no_proxy_hosts: &[String]) -> bool {
    !no_proxy_hosts.iter().any(|pattern| {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return false;
        }
        let expr = format!("(?i)^{}$", regex::escape(pattern).replace(r"\*", ".*"));
        match Regex::new(&expr) {
            Ok(re) => re.is_match(host),
            Err(e) => {
                warn!("Ignoring invalid no-proxy pattern '{}': {}", pattern, e);
                false
            }
        }
    })
}

fn check_status(response: Response, url: &Url) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let reason = status.canonical_reason().unwrap_or("");
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(CoreError::ServiceUnavailable(format!(
            "HTTP {} {} for {}",
            status.as_u16(),
            reason,
            url
        )));
    }
    Err(CoreError::Transport(format!("HTTP {} {} for {}", status.as_u16(), reason, url)))
}

fn transport_error(error: reqwest::Error) -> CoreError {
    CoreError::Transport(describe_error(&error))
}

/// The error and its whole source chain; connection failures only name the
/// cause (refused, DNS) deep in the chain.
fn describe_error(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
