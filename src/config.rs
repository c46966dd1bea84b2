//! Configuration of the signd daemon.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fmt, fs, io};

use clap::{Arg, Command};
use log::{error, info, LevelFilter};
use secrecy::SecretString;
use serde::de;
use serde::{Deserialize, Deserializer};

use crate::constants::*;
use crate::daemon::auth::UserRights;

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }
    fn port() -> u16 {
        6000
    }
    fn log_level() -> LevelFilter {
        match env::var(SIGND_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        SIGND_ENV_LOG_LEVEL
                    );
                    ::std::process::exit(1);
                }
            },
            _ => LevelFilter::Info,
        }
    }
    fn log_type() -> LogType {
        LogType::Stderr
    }
    fn log_file() -> PathBuf {
        PathBuf::from("./signd.log")
    }
    fn post_limit() -> u64 {
        HTTP_POST_LIMIT
    }
    fn globalsign_base_url() -> String {
        "https://emea.api.dss.globalsign.com:8443/v2".to_string()
    }
    fn globalsign_api_key() -> String {
        env_or_die(GLOBALSIGN_ENV_API_KEY, "globalsign api_key")
    }
    fn globalsign_api_secret() -> SecretString {
        env_or_die(GLOBALSIGN_ENV_API_SECRET, "globalsign api_secret").into()
    }
    fn globaltrust_base_url() -> String {
        "https://t2g.globaltrust.eu/trust2go".to_string()
    }
    fn globaltrust_api_user() -> String {
        env_or_die(T2GO_ENV_USER, "globaltrust api_user")
    }
    fn globaltrust_api_password() -> SecretString {
        env_or_die(T2GO_ENV_PASSWORD, "globaltrust api_password").into()
    }
    fn hsm_module_path() -> PathBuf {
        PathBuf::from("/usr/lib/softhsm/libsofthsm2.so")
    }
    fn hsm_user_pin() -> SecretString {
        env_or_die(HSM_ENV_PIN, "hsm user_pin").into()
    }
}

/// Secrets may live in the environment instead of the config file.
/// Refusing to start beats limping along without credentials.
fn env_or_die(var: &str, setting: &str) -> String {
    match env::var(var) {
        Ok(value) => value,
        Err(_) => {
            eprintln!(
                "You MUST provide a value for '{setting}', either in the \
                 config file or through the {var} environment variable."
            );
            ::std::process::exit(1);
        }
    }
}

//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "ConfigDefaults::ip")]
    pub ip: IpAddr,

    #[serde(default = "ConfigDefaults::port")]
    pub port: u16,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "ConfigDefaults::post_limit")]
    pub post_limit: u64,

    #[serde(default)]
    pub auth: AuthConfig,

    pub privatekey: Option<PrivateKeyConfig>,

    pub hsm: Option<HsmConfig>,

    pub globalsign: Option<GlobalSignConfig>,

    pub globaltrust: Option<GlobalTrustConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuthConfig {
    /// The caller identities known to this deployment and their
    /// rights. Anything not listed here cannot sign.
    #[serde(default)]
    pub users: HashMap<String, UserRights>,
}

/// Settings for the local private key backend.
#[derive(Clone, Debug, Deserialize)]
pub struct PrivateKeyConfig {
    pub signer_cert: PathBuf,
    pub signer_key: PathBuf,
    #[serde(default)]
    pub ca_certs: Vec<PathBuf>,
}

/// Settings for the PKCS#11 backend.
#[derive(Clone, Debug, Deserialize)]
pub struct HsmConfig {
    #[serde(default = "ConfigDefaults::hsm_module_path")]
    pub module_path: PathBuf,

    /// Token label to select the slot by. Without it the first slot
    /// with a token present is used.
    #[serde(default)]
    pub slot_label: Option<String>,

    #[serde(default = "ConfigDefaults::hsm_user_pin")]
    pub user_pin: SecretString,

    /// The private key never leaves the token, so the certificates
    /// belonging to it are configured separately.
    pub signer_cert: PathBuf,
    #[serde(default)]
    pub ca_certs: Vec<PathBuf>,
}

/// Settings for the GlobalSign DSS backend.
#[derive(Clone, Debug, Deserialize)]
pub struct GlobalSignConfig {
    #[serde(default = "ConfigDefaults::globalsign_base_url")]
    pub base_url: String,

    #[serde(default = "ConfigDefaults::globalsign_api_key")]
    pub api_key: String,

    #[serde(default = "ConfigDefaults::globalsign_api_secret")]
    pub api_secret: SecretString,

    /// Client certificate and key for the mutual TLS the production
    /// endpoint requires.
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
}

/// Settings for the GlobalTrust Trust2Go backend.
#[derive(Clone, Debug, Deserialize)]
pub struct GlobalTrustConfig {
    #[serde(default = "ConfigDefaults::globaltrust_base_url")]
    pub base_url: String,

    #[serde(default = "ConfigDefaults::globaltrust_api_user")]
    pub api_user: String,

    #[serde(default = "ConfigDefaults::globaltrust_api_password")]
    pub api_password: SecretString,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Stderr,
    File,
}

impl Config {
    /// Creates the config from the command line and config file, and
    /// initializes logging.
    pub fn create() -> Result<Self, ConfigError> {
        let matches = Command::new("signd")
            .version(SIGND_VERSION)
            .about("Document signing service")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Override the default config file location"),
            )
            .get_matches();

        let config_file = matches
            .get_one::<String>("config")
            .map(String::as_str)
            .unwrap_or(SIGND_DEFAULT_CONFIG_FILE);

        let config = Self::read_config(config_file)?;
        config.init_logging()?;
        info!("signd {} started with config '{config_file}'", SIGND_VERSION);
        Ok(config)
    }

    pub fn read_config(file: &str) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(file).map_err(|e| {
            ConfigError::Other(format!(
                "Cannot read config file '{file}': {e}"
            ))
        })?;
        let config: Config = toml::from_str(&s)?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::Stderr => self.stderr_logger(),
            LogType::File => self.file_logger(&self.log_file),
        }
    }

    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger().chain(io::stderr()).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init stderr logging: {e}"))
        })
    }

    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!(
                    "Failed to open log file '{}': {}",
                    path.display(),
                    err
                );
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger().chain(file).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init file logging: {e}"))
        })
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);

        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("rustls", framework_level)
            .level_for("hyper", framework_level)
            .level_for("hyper_util", framework_level)
            .level_for("mio", framework_level)
            .level_for("reqwest", framework_level)
            .level_for("want", framework_level)
            .level_for("h2", framework_level)
    }
}

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(d)?;
    LevelFilter::from_str(&s).map_err(|_| {
        de::Error::custom(format!("unrecognized log level '{s}'"))
    })
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [auth.users."user-1-with-rights"]
            can_sign = true

            [privatekey]
            signer_cert = "/certs/test-signer.cert"
            signer_key = "/certs/test-signer.key"
            ca_certs = ["/certs/test-ca.cert"]
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.log_type, LogType::Stderr);
        assert_eq!(config.post_limit, HTTP_POST_LIMIT);
        assert!(config.auth.users["user-1-with-rights"].can_sign);
        assert!(config.privatekey.is_some());
        assert!(config.hsm.is_none());
    }

    #[test]
    fn provider_sections_parse() {
        let config: Config = toml::from_str(
            r#"
            log_level = "debug"

            [globalsign]
            api_key = "key"
            api_secret = "secret"

            [globaltrust]
            base_url = "https://t2g.example.com/trust2go"
            api_user = "user"
            api_password = "password"
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, LevelFilter::Debug);
        let globalsign = config.globalsign.unwrap();
        assert_eq!(
            globalsign.base_url,
            "https://emea.api.dss.globalsign.com:8443/v2"
        );
        assert!(globalsign.tls_cert.is_none());
        let globaltrust = config.globaltrust.unwrap();
        assert_eq!(globaltrust.api_user, "user");
    }
}
