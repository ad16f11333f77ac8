//! Server configuration and where it comes from.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use mindctrl_protocol::DEFAULT_NAMESPACE;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Schemes a bus URL may use.
pub const SUPPORTED_SCHEMES: &[&str] = &["mqtt", "mqtts", "tcp", "ssl", "ws", "wss"];

/// Version of the on-disk configuration format.
pub const CONFIG_SCHEMA: u32 = 1;

/// Where to connect and under which name to serve.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
	pub url: String,
	/// Stable server name; requests arrive on `<ns>/servers/<name>`.
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub password: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServerConfig")
			.field("url", &self.url)
			.field("name", &self.name)
			.field("username", &self.username)
			.field("password", &self.password.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

impl ServerConfig {
	pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			name: name.into(),
			username: None,
			password: None,
		}
	}

	pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
		self.username = Some(username.into());
		self.password = Some(password.into());
		self
	}

	/// Checks that the URL is usable and the name non-empty.
	pub fn validate(&self) -> Result<()> {
		validate_url(&self.url)?;
		if self.name.trim().is_empty() {
			return Err(Error::InvalidConfig("server name must not be empty".into()));
		}
		if self.name.contains(['/', '+', '#']) {
			return Err(Error::InvalidConfig(format!(
				"server name {:?} must not contain '/', '+' or '#'",
				self.name
			)));
		}
		Ok(())
	}
}

/// Checks a bus URL: parseable, supported scheme, host and port present.
pub fn validate_url(raw: &str) -> Result<Url> {
	if raw.trim().is_empty() {
		return Err(Error::InvalidConfig("bus url must not be empty".into()));
	}
	let url = Url::parse(raw).map_err(|err| Error::InvalidConfig(format!("invalid bus url {raw:?}: {err}")))?;
	if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
		return Err(Error::InvalidConfig(format!(
			"unsupported scheme {:?}; expected one of {}",
			url.scheme(),
			SUPPORTED_SCHEMES.join(", ")
		)));
	}
	if url.host_str().is_none_or(str::is_empty) {
		return Err(Error::InvalidConfig(format!("bus url {raw:?} has no host")));
	}
	if explicit_port(raw, &url).is_none() {
		return Err(Error::InvalidConfig(format!("bus url {raw:?} has no port")));
	}
	Ok(url)
}

/// Port written out in `raw`, including one equal to the scheme default,
/// which `Url::port` hides for `ws` and `wss`.
pub(crate) fn explicit_port(raw: &str, url: &Url) -> Option<u16> {
	if let Some(port) = url.port() {
		return Some(port);
	}
	let port = url.port_or_known_default()?;
	let rest = raw.trim().split_once("://")?.1;
	let authority = rest.split(['/', '?', '#']).next()?;
	let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
	host_port.ends_with(&format!(":{port}")).then_some(port)
}

/// Tunables of a running server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
	/// Topic namespace prefix.
	pub namespace: String,
	/// How often `alive` is republished while serving.
	pub liveness_interval: Duration,
	/// Upper bound on establishing the bus connection.
	pub connect_timeout: Duration,
}

impl Default for ServerOptions {
	fn default() -> Self {
		Self {
			namespace: DEFAULT_NAMESPACE.to_string(),
			liveness_interval: Duration::from_secs(60),
			connect_timeout: Duration::from_secs(10),
		}
	}
}

/// Supplies the configuration read on every start.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
	/// Returns `None` when nothing is configured.
	async fn load(&self) -> Result<Option<ServerConfig>>;
}

/// Fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig(pub Option<ServerConfig>);

impl StaticConfig {
	pub fn new(config: ServerConfig) -> Self {
		Self(Some(config))
	}

	pub fn empty() -> Self {
		Self(None)
	}
}

#[async_trait]
impl ConfigProvider for StaticConfig {
	async fn load(&self) -> Result<Option<ServerConfig>> {
		Ok(self.0.clone())
	}
}

#[derive(Serialize, Deserialize)]
struct ConfigFile {
	schema: u32,
	#[serde(flatten)]
	server: ServerConfig,
}

/// JSON configuration file, by default `$XDG_CONFIG_HOME/mindctrl/config.json`.
///
/// Files written under a different schema version are treated as absent.
#[derive(Debug, Clone)]
pub struct FileConfig {
	path: PathBuf,
}

impl FileConfig {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Uses [`default_config_path`].
	pub fn standard() -> Self {
		Self::new(default_config_path())
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn read(&self) -> Result<Option<ServerConfig>> {
		let content = match fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(err) => return Err(err.into()),
		};
		let value: serde_json::Value = serde_json::from_str(&content)?;
		let schema = value.get("schema").and_then(serde_json::Value::as_u64);
		if schema != Some(u64::from(CONFIG_SCHEMA)) {
			debug!(
				target = "mindctrl.config",
				path = %self.path.display(),
				?schema,
				"ignoring config with foreign schema"
			);
			return Ok(None);
		}
		let file: ConfigFile = serde_json::from_value(value)?;
		Ok(Some(file.server))
	}

	pub fn write(&self, config: &ServerConfig) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		let file = ConfigFile {
			schema: CONFIG_SCHEMA,
			server: config.clone(),
		};
		fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
		}
		Ok(())
	}
}

#[async_trait]
impl ConfigProvider for FileConfig {
	async fn load(&self) -> Result<Option<ServerConfig>> {
		self.read()
	}
}

/// `$XDG_CONFIG_HOME/mindctrl/config.json`, falling back to `~/.config`.
pub fn default_config_path() -> PathBuf {
	let config_home = std::env::var_os("XDG_CONFIG_HOME")
		.map(PathBuf::from)
		.or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
		.unwrap_or_else(|| PathBuf::from("."));
	config_home.join("mindctrl").join("config.json")
}
