//! Deployment configuration: application, builder, sites and their servers.
//!
//! The file is read once per invocation (JSON or TOML by extension),
//! validated, and then shared read-only for the rest of the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::os::OsTag;
use crate::summary::Vars;
use crate::utils::io;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub deploy: DeploySettings,
    #[serde(default)]
    pub env: Vars,
    /// Directory whose `<os>/<script>` files override the built-in remote scripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<PathBuf>,
    pub sites: BTreeMap<String, SiteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_app_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_deploy_root")]
    pub deploy_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderConfig {
    #[serde(default = "default_builder_binary")]
    pub binary: String,
    /// Extra environment for build subprocesses only.
    #[serde(default)]
    pub env: Vars,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            binary: default_builder_binary(),
            env: Vars::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(default, alias = "arch", skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default = "default_gzip_level")]
    pub gzip_level: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            directory: None,
            architecture: None,
            server: None,
            gzip_level: default_gzip_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploySettings {
    /// Seconds to wait after restarting before verifying the deployment.
    #[serde(default = "default_check_delay")]
    pub check_delay: u64,
    /// Upper bound on hosts processed concurrently within a site.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            check_delay: default_check_delay(),
            max_parallel: default_max_parallel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub env: Vars,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<SslConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default, alias = "pem", skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    #[serde(default)]
    pub os: OsTag,
    #[serde(default)]
    pub env: Vars,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslConfig {
    pub email: String,
    pub domain: String,
}

fn default_app_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_port() -> u16 {
    80
}

fn default_deploy_root() -> String {
    "/opt".to_string()
}

fn default_builder_binary() -> String {
    "meteor".to_string()
}

fn default_gzip_level() -> u32 {
    6
}

fn default_check_delay() -> u64 {
    10
}

fn default_max_parallel() -> usize {
    10
}

fn default_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl Config {
    /// Site by name, or `site.not_found` listing the configured sites.
    pub fn site(&self, name: &str) -> Result<&SiteConfig> {
        self.sites
            .get(name)
            .ok_or_else(|| Error::site_not_found(name, self.site_names()))
    }

    pub fn site_names(&self) -> Vec<String> {
        self.sites.keys().cloned().collect()
    }

    /// Application environment for one server: global, then site, then server overrides.
    pub fn env_for(&self, site: &SiteConfig, server: &ServerConfig) -> Vars {
        let mut env = self.env.clone();
        env.extend(site.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(server.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Resolve requested site names; empty means every configured site.
    pub fn resolve_sites(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.site_names());
        }
        for name in requested {
            self.site(name)?;
        }
        let mut seen = Vec::with_capacity(requested.len());
        for name in requested {
            if !seen.contains(name) {
                seen.push(name.clone());
            }
        }
        Ok(seen)
    }

    pub fn validate(&self) -> Result<()> {
        let name_pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$")
            .map_err(|e| Error::internal_unexpected(e.to_string()))?;
        if !name_pattern.is_match(&self.app.name) {
            return Err(Error::config_invalid_value(
                "app.name",
                Some(self.app.name.clone()),
                "must start with a letter or digit and contain only letters, digits, '.', '_' or '-'",
            ));
        }

        if self.sites.is_empty() {
            return Err(Error::config_invalid_value(
                "sites",
                None,
                "at least one site must be configured",
            ));
        }

        if !(1..=9).contains(&self.build.gzip_level) {
            return Err(Error::config_invalid_value(
                "build.gzipLevel",
                Some(self.build.gzip_level.to_string()),
                "must be between 1 and 9",
            ));
        }

        if self.deploy.max_parallel == 0 {
            return Err(Error::config_invalid_value(
                "deploy.maxParallel",
                Some("0".to_string()),
                "must be at least 1",
            ));
        }

        for (site_name, site) in &self.sites {
            for (index, server) in site.servers.iter().enumerate() {
                let key = format!("sites.{}.servers[{}]", site_name, index);
                if server.host.trim().is_empty() {
                    return Err(Error::config_invalid_value(
                        format!("{}.host", key),
                        None,
                        "host is required",
                    ));
                }
                if server.user.trim().is_empty() {
                    return Err(Error::config_invalid_value(
                        format!("{}.user", key),
                        None,
                        "user is required",
                    ));
                }
                if let Some(identity_file) = server.identity_file.as_deref().filter(|p| !p.is_empty()) {
                    let expanded = shellexpand::tilde(identity_file).to_string();
                    if !Path::new(&expanded).exists() {
                        return Err(Error::ssh_identity_file_not_found(
                            server.host.clone(),
                            expanded,
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Parse and validate configuration content.
///
/// A relative `app.directory` or `scripts` path is resolved against `base_dir`.
pub fn parse(content: &str, format: ConfigFormat, origin: &str, base_dir: &Path) -> Result<Config> {
    let raw: serde_json::Value = match format {
        ConfigFormat::Json => serde_json::from_str(content)
            .map_err(|e| Error::config_invalid_json(origin, e.to_string()))?,
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| Error::config_invalid_json(origin, e.to_string()))?
        }
    };
    check_os_tags(&raw)?;
    let mut config: Config =
        serde_json::from_value(raw).map_err(|e| Error::config_invalid_json(origin, e.to_string()))?;

    if config.app.directory.is_relative() {
        config.app.directory = base_dir.join(&config.app.directory);
    }
    if let Some(scripts) = config.scripts.as_mut() {
        if scripts.is_relative() {
            *scripts = base_dir.join(&*scripts);
        }
    }

    config.validate()?;
    Ok(config)
}

/// Unknown server OS tags fail as `os.unsupported`, not as a parse error.
fn check_os_tags(raw: &serde_json::Value) -> Result<()> {
    let sites = match raw.get("sites").and_then(|sites| sites.as_object()) {
        Some(sites) => sites,
        None => return Ok(()),
    };
    for site in sites.values() {
        let servers = site.get("servers").and_then(|servers| servers.as_array());
        for server in servers.into_iter().flatten() {
            if let Some(tag) = server.get("os").and_then(|os| os.as_str()) {
                tag.parse::<OsTag>()?;
            }
        }
    }
    Ok(())
}

/// Load configuration from a file.
pub fn load(path: &Path) -> Result<Config> {
    let content = io::read_file(path, "read config")?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parse(
        &content,
        ConfigFormat::from_path(path),
        &path.display().to_string(),
        base_dir,
    )
}
