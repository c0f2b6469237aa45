//! Command-line interface for streamable-rpc.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Command-line arguments.
///
/// Unset options leave the configuration file and environment untouched.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Host address to bind to.
    pub host: Option<IpAddr>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// API key for authentication (overrides config file).
    pub api_key: Option<String>,
    /// Disable authentication.
    pub no_auth: bool,
    /// Run without sessions.
    pub stateless: bool,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                let value: String = parser.value()?.parse()?;
                let host = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("host", value))?;
                result.host = Some(host);
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                let port = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("port", value))?;
                result.port = Some(port);
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('k') | Long("api-key") => {
                result.api_key = Some(parser.value()?.parse()?);
            }
            Long("no-auth") => {
                result.no_auth = true;
            }
            Long("stateless") => {
                result.stateless = true;
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"streamable-rpc {version}
JSON-RPC 2.0 server over the streamable HTTP transport

USAGE:
    streamable-rpc [OPTIONS]

OPTIONS:
    -H, --host <ADDR>       Host address to bind [default: 127.0.0.1]
    -p, --port <PORT>       Port to listen on [default: 3000]
    -c, --config <FILE>     Path to configuration file (JSON)
    -k, --api-key <KEY>     API key for authentication
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
        --stateless         Serve every POST without a session
        --no-auth           Disable authentication
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    STREAMABLE_RPC_HOST       Host address (overrides config)
    STREAMABLE_RPC_PORT       Port number (overrides config)
    STREAMABLE_RPC_PATH       Transport path (overrides config)
    STREAMABLE_RPC_API_KEY    API key (overrides config)
    STREAMABLE_RPC_STATELESS  Stateless mode (true/false)
    STREAMABLE_RPC_LOG_LEVEL  Log level (overrides config)
    RUST_LOG                  Alternative log level setting

EXAMPLES:
    # Start with defaults (localhost:3000, no auth)
    streamable-rpc

    # Start on all interfaces with API key
    streamable-rpc -H 0.0.0.0 -p 8080 -k my-secret-key

    # Start with config file
    streamable-rpc -c /etc/streamable-rpc/config.json
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("streamable-rpc {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("{0}")]
    Lexopt(#[from] lexopt::Error),

    #[error("invalid value for --{0}: '{1}'")]
    InvalidValue(&'static str, String),

    #[error("unexpected argument: '{0}'")]
    UnexpectedArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("streamable-rpc")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert!(result.host.is_none());
        assert!(result.port.is_none());
        assert!(!result.no_auth);
        assert!(!result.stateless);
    }

    #[test]
    fn test_host_port() {
        let result = parse_args_from(args(&["-H", "0.0.0.0", "-p", "8080"])).unwrap();
        assert_eq!(result.host.unwrap().to_string(), "0.0.0.0");
        assert_eq!(result.port, Some(8080));
    }

    #[test]
    fn test_long_options() {
        let result =
            parse_args_from(args(&["--host", "192.168.1.1", "--port", "9000"])).unwrap();
        assert_eq!(result.host.unwrap().to_string(), "192.168.1.1");
        assert_eq!(result.port, Some(9000));
    }

    #[test]
    fn test_api_key() {
        let result = parse_args_from(args(&["-k", "my-secret"])).unwrap();
        assert_eq!(result.api_key, Some("my-secret".to_string()));
    }

    #[test]
    fn test_config_file() {
        let result = parse_args_from(args(&["-c", "/etc/config.json"])).unwrap();
        assert_eq!(result.config, Some(PathBuf::from("/etc/config.json")));
    }

    #[test]
    fn test_flags() {
        let result = parse_args_from(args(&["--no-auth", "--stateless"])).unwrap();
        assert!(result.no_auth);
        assert!(result.stateless);
    }

    #[test]
    fn test_help_and_version() {
        assert!(parse_args_from(args(&["-h"])).unwrap().help);
        assert!(parse_args_from(args(&["--help"])).unwrap().help);
        assert!(parse_args_from(args(&["-V"])).unwrap().version);
        assert!(parse_args_from(args(&["--version"])).unwrap().version);
    }

    #[test]
    fn test_log_level() {
        let result = parse_args_from(args(&["-l", "debug"])).unwrap();
        assert_eq!(result.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_invalid_values() {
        let err = parse_args_from(args(&["-p", "invalid"])).unwrap_err();
        assert_eq!(err.to_string(), "invalid value for --port: 'invalid'");

        assert!(parse_args_from(args(&["-H", "not-an-ip"])).is_err());
        assert!(parse_args_from(args(&["--port"])).is_err());
    }

    #[test]
    fn test_unexpected_arguments() {
        let err = parse_args_from(args(&["serve"])).unwrap_err();
        assert!(matches!(err, ArgsError::UnexpectedArgument(ref a) if a == "serve"));

        assert!(parse_args_from(args(&["--no-rate-limit"])).is_err());
    }
}
