//! Constants shared across signd.

use std::time::Duration;

pub const SIGND_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const SIGND_DEFAULT_CONFIG_FILE: &str = "/etc/signd.conf";

pub const SIGND_ENV_LOG_LEVEL: &str = "SIGND_LOG_LEVEL";

/// Secrets can be supplied through the environment instead of the
/// config file, mirroring the variable names used by the providers'
/// own documentation.
pub const GLOBALSIGN_ENV_API_KEY: &str = "GLOBALSIGN_API_KEY";
pub const GLOBALSIGN_ENV_API_SECRET: &str = "GLOBALSIGN_API_SECRET";
pub const T2GO_ENV_USER: &str = "T2GO_USER";
pub const T2GO_ENV_PASSWORD: &str = "T2GO_PASSWORD";
pub const HSM_ENV_PIN: &str = "HSM_PIN";

/// Upper bound on the size of a POSTed signing request. The documents
/// arrive Base64 encoded inside a JSON body, so this needs to be
/// generous.
pub const HTTP_POST_LIMIT: u64 = 100 * 1024 * 1024; // 100MB

/// Timeout applied to calls made to the remote signing providers.
pub const PROVIDER_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a remote signing identity may be reused. The issuer
/// advertises a 10 minute expiry; staying a minute under that avoids
/// signing with an identity that expires mid-request.
pub const IDENTITY_REUSE_TTL: Duration = Duration::from_secs(9 * 60);
