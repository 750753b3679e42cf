use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Start URL used when none is given on the command line or in the environment.
pub const DEFAULT_START_URL: &str = "mercury.sandbox.starofservice.com";

const DEFAULT_USER_AGENT: &str = "SOS.ApiRequestTask/1.0";

// Every host the suite knows how to target. A host missing from this list can only
// be used together with an explicit `--env`.
const KNOWN_HOSTS: [(&str, Environment); 3] = [
    ("localhost:8009", Environment::Dev),
    ("mercury.sandbox.starofservice.com", Environment::Sandbox),
    ("mercury.starofservice.com", Environment::Prod),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Sandbox,
    Prod,
}

#[derive(Debug, PartialEq, Eq)]
pub struct EnvironmentParseError;

impl FromStr for Environment {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<Environment, Self::Err> {
        match env.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "sandbox" => Ok(Environment::Sandbox),
            "prod" => Ok(Environment::Prod),
            _ => Err(EnvironmentParseError),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Environment::Dev => write!(f, "dev"),
            Environment::Sandbox => write!(f, "sandbox"),
            Environment::Prod => write!(f, "prod"),
        }
    }
}

impl Environment {
    /// Looks up the environment a known host belongs to.
    pub fn for_host(host: &str) -> Option<Environment> {
        KNOWN_HOSTS
            .iter()
            .find(|(known, _)| *known == host)
            .map(|(_, env)| *env)
    }

    pub fn http_scheme(&self) -> &'static str {
        match self {
            Environment::Dev => "http",
            _ => "https",
        }
    }

    pub fn ws_scheme(&self) -> &'static str {
        match self {
            Environment::Dev => "ws",
            _ => "wss",
        }
    }
}

/// Errors raised while turning the configuration into concrete endpoints.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The start URL does not contain a host.
    InvalidStartUrl(String),
    /// The host is not in the known host table and no environment was given.
    UnknownHost(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::InvalidStartUrl(url) => write!(f, "no host found in start URL '{url}'"),
            ConfigError::UnknownHost(host) => write!(
                f,
                "unknown host '{host}': pass --env to target it explicitly"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// The endpoints a run talks to, derived from the start URL and environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub environment: Environment,
    pub host: String,
    pub graphql_endpoint: String,
    pub ws_endpoint: String,
}

impl Endpoints {
    pub fn new(environment: Environment, host: &str) -> Self {
        Self {
            environment,
            host: host.to_string(),
            graphql_endpoint: format!("{}://{}/graphql", environment.http_scheme(), host),
            ws_endpoint: format!("{}://{}/graphql-ws", environment.ws_scheme(), host),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Environment to run the tests against. Inferred from the start URL when omitted.
    #[arg(
        long,
        env = "MERCURY_ENV",
        value_parser = clap::builder::PossibleValuesParser::new(["dev", "sandbox", "prod"])
            .map(|s| s.parse::<Environment>().unwrap()),
    )]
    pub env: Option<Environment>,

    /// Domain to run the tests against, with or without scheme and path.
    #[arg(long, env, default_value = DEFAULT_START_URL)]
    pub start_url: String,

    /// Secret key used to sign the auth tokens of the synthetic users.
    #[arg(long, env)]
    jwt_key: Option<String>,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Upper bound in milliseconds for a single request or subscription event latency
    #[arg(long, env, default_value_t = 2000)]
    pub time_assert_ms: u64,

    /// Seconds to wait for a subscription and its trigger to both complete
    #[arg(long, env, default_value_t = 60)]
    pub deadline_secs: u64,

    /// Milliseconds the triggering request waits so the subscription is registered first
    #[arg(long, env, default_value_t = 1000)]
    pub grace_period_ms: u64,

    /// Total seconds spent retrying a dual-session run that failed to connect
    #[arg(long, env, default_value_t = 5)]
    pub retry_budget_secs: u64,

    /// Lifetime in minutes of the tokens minted for the synthetic users
    #[arg(long, env, default_value_t = 30)]
    pub token_ttl_minutes: i64,

    /// Directory holding the queries/, mutations/ and subscriptions/ payload files
    #[arg(long, env, default_value = "resources/gql_payload")]
    pub payload_dir: String,

    /// GraphQL over WebSocket sub-protocol spoken by the server
    #[arg(
        long,
        env,
        default_value = "graphql-ws",
        value_parser = clap::builder::PossibleValuesParser::new(["graphql-ws", "graphql-transport-ws"]),
    )]
    pub ws_protocol: String,

    /// Value of the `Country` header sent with every request
    #[arg(long, env, default_value = "fr")]
    pub country: String,

    /// Value of the `User-Agent` header sent with every request
    #[arg(long, env, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,
}

impl Config {
    pub fn jwt_key(&self) -> Option<&str> {
        self.jwt_key.as_deref()
    }

    /// Resolves the environment and derives the HTTP and WebSocket endpoints.
    ///
    /// An explicit `--env` always wins. Otherwise the host must be one of the
    /// known hosts, and an unknown host is a hard error.
    pub fn resolve(&self) -> Result<Endpoints, ConfigError> {
        let host = extract_host(&self.start_url)
            .ok_or_else(|| ConfigError::InvalidStartUrl(self.start_url.clone()))?;

        let environment = match self.env {
            Some(env) => env,
            None => Environment::for_host(host)
                .ok_or_else(|| ConfigError::UnknownHost(host.to_string()))?,
        };

        Ok(Endpoints::new(environment, host))
    }

    /// Schema introspection is skipped against prod to keep latencies honest.
    pub fn introspection_enabled(&self, endpoints: &Endpoints) -> bool {
        endpoints.environment != Environment::Prod
    }

    /// Headers sent with every GraphQL request, before authorization is added.
    pub fn gql_headers(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Country".to_string(), self.country.clone()),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ])
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn retry_budget(&self) -> Duration {
        Duration::from_secs(self.retry_budget_secs)
    }
}

/// Loads a `.env` file from the working directory, if any, into the process environment.
pub fn load_dotenv() {
    dotenv().ok();
}

/// Strips scheme, a leading `www.` and any path from the start URL.
fn extract_host(start_url: &str) -> Option<&str> {
    let trimmed = start_url.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);
    let host = without_www.split('/').next().unwrap_or_default();

    (!host.is_empty()).then_some(host)
}
