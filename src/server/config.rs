use clap::Parser;
use log::LevelFilter;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::error::ServerError;

pub const DEFAULT_LISTEN: &str = "http://localhost:8000";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Serve a directory over HTTP", long_about = None)]
pub struct ServerConfig {
    /// Directory to serve (avoid `..` segments in this path)
    #[arg(short = 'd', value_name = "DIR", default_value = ".")]
    pub root_dir: PathBuf,

    /// Listening address, http://ADDR:PORT or :PORT
    #[arg(short = 'l', value_name = "ADDR", default_value = DEFAULT_LISTEN)]
    pub listen: ListenAddr,

    /// Debug level, from 0 to 4
    #[arg(
        short = 'v',
        value_name = "LEVEL",
        default_value_t = 2,
        value_parser = clap::value_parser!(u8).range(0..=4)
    )]
    pub verbosity: u8,

    /// Enable traffic hexdump, yes|no
    #[arg(
        short = 'H',
        value_name = "yes|no",
        default_value = "no",
        action = clap::ArgAction::Set,
        value_parser = parse_yes_no
    )]
    pub hexdump: bool,

    /// Basic auth username
    #[arg(short = 'u', value_name = "USER")]
    pub username: Option<String>,

    /// Basic auth password
    #[arg(short = 'p', value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Maximum number of simultaneous connections
    #[arg(long, default_value_t = 1000)]
    pub max_connections: usize,

    /// Maximum size of a request head plus body in bytes
    #[arg(long, default_value_t = 8192)]
    pub max_request_size: usize,

    /// pselect timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Answer 403 instead of listing directories without index.html
    #[arg(long)]
    pub no_listing: bool,
}

impl ServerConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.as_deref(), self.password.as_deref())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn log_level(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            listen: ListenAddr {
                host: "localhost".to_string(),
                port: 8000,
            },
            verbosity: 2,
            hexdump: false,
            username: None,
            password: None,
            max_connections: 1000,
            max_request_size: 8192,
            poll_interval_ms: 1000,
            no_listing: false,
        }
    }
}

/// Username and password a request must present. `None` leaves that half unchecked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: Option<&str>, password: Option<&str>) -> Self {
        Self {
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }
}

/// Host and port taken from `http://host:port`, `host:port` or `:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub host: String,
    pub port: u16,
}

impl ListenAddr {
    pub fn resolve(&self) -> Result<SocketAddr, ServerError> {
        let invalid = |reason: String| ServerError::InvalidAddress {
            addr: self.to_string(),
            reason,
        };

        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        (host, self.port)
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?
            .next()
            .ok_or_else(|| invalid("host resolved to no addresses".to_string()))
    }
}

impl FromStr for ListenAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let usage = || format!("cannot listen on {s}. Use http://ADDR:PORT or :PORT");

        let rest = match s.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => rest,
            Some(_) => return Err(usage()),
            None => s,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = rest.rsplit_once(':').ok_or_else(usage)?;
        let port: u16 = port.parse().map_err(|_| usage())?;

        if host.contains('/') || (host.contains(':') && !host.starts_with('[')) {
            return Err(usage());
        }

        let host = if host.is_empty() { "0.0.0.0" } else { host };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}", self.host, self.port)
    }
}

fn parse_yes_no(value: &str) -> Result<bool, String> {
    if value.eq_ignore_ascii_case("yes") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("no") {
        Ok(false)
    } else {
        Err(format!("expected yes or no, got '{value}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_command_line_defaults() {
        let parsed = ServerConfig::try_parse_from(["serve-dir"]).unwrap();
        let default = ServerConfig::default();

        assert_eq!(parsed.root_dir, default.root_dir);
        assert_eq!(parsed.listen, default.listen);
        assert_eq!(parsed.verbosity, 2);
        assert!(!parsed.hexdump);
        assert!(!parsed.credentials().is_enabled());
        assert_eq!(parsed.log_level(), LevelFilter::Info);
    }

    #[test]
    fn short_flags_are_parsed() {
        let parsed = ServerConfig::try_parse_from([
            "serve-dir", "-d", "/srv/www", "-l", ":9000", "-v", "4", "-H", "YES", "-u", "alice",
            "-p", "secret",
        ])
        .unwrap();

        assert_eq!(parsed.root_dir, PathBuf::from("/srv/www"));
        assert_eq!(parsed.listen.host, "0.0.0.0");
        assert_eq!(parsed.listen.port, 9000);
        assert_eq!(parsed.log_level(), LevelFilter::Trace);
        assert!(parsed.hexdump);
        assert_eq!(parsed.credentials(), Credentials::new(Some("alice"), Some("secret")));
    }

    #[test]
    fn unknown_flag_and_missing_argument_are_usage_errors() {
        assert!(ServerConfig::try_parse_from(["serve-dir", "-x"]).is_err());
        assert!(ServerConfig::try_parse_from(["serve-dir", "-d"]).is_err());
        assert!(ServerConfig::try_parse_from(["serve-dir", "-v", "5"]).is_err());
        assert!(ServerConfig::try_parse_from(["serve-dir", "-H", "maybe"]).is_err());
    }

    #[test]
    fn listen_address_forms() {
        let addr: ListenAddr = "http://127.0.0.1:8080".parse().unwrap();
        assert_eq!(addr, ListenAddr { host: "127.0.0.1".into(), port: 8080 });

        let addr: ListenAddr = "localhost:81".parse().unwrap();
        assert_eq!(addr.host, "localhost");

        let addr: ListenAddr = "http://[::1]:8000/".parse().unwrap();
        assert_eq!(addr.host, "[::1]");
        assert!(addr.resolve().unwrap().is_ipv6());

        assert!("https://localhost:443".parse::<ListenAddr>().is_err());
        assert!("localhost".parse::<ListenAddr>().is_err());
        assert!(":http".parse::<ListenAddr>().is_err());
        assert!(":70000".parse::<ListenAddr>().is_err());
    }

    #[test]
    fn partial_credentials_enable_auth() {
        assert!(Credentials::new(Some("alice"), None).is_enabled());
        assert!(Credentials::new(None, Some("secret")).is_enabled());
        assert!(!Credentials::default().is_enabled());
    }
}
