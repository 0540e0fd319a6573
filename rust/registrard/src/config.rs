use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser, Clone)]
#[command(name = "registrard", version, about = "Registrar sidecar speaking JSON lines on stdin/stdout")]
pub struct Config {
    /// Workspace opened at start-up; the host can still switch with `workspace.select`.
    #[arg(long, env = "REGISTRARD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    #[arg(long, env = "REGISTRARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "REGISTRARD_REQUEST_DELAY_MS", default_value_t = 100)]
    pub request_delay_ms: u64,

    #[arg(
        long,
        env = "REGISTRARD_ABORT_ON_FIRST_AUTH_FAILURE",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub abort_on_first_auth_failure: bool,
}

impl Config {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_command_line_uses_pacing_defaults() {
        let c = Config::try_parse_from(["registrard"]).expect("parse");
        assert_eq!(c.request_delay(), Duration::from_millis(100));
        assert!(c.abort_on_first_auth_failure);
        assert_eq!(c.log_level, "info");
    }

    #[test]
    fn flags_override_defaults() {
        let c = Config::try_parse_from([
            "registrard",
            "--request-delay-ms",
            "0",
            "--abort-on-first-auth-failure",
            "false",
            "--workspace",
            "/tmp/ws",
        ])
        .expect("parse");
        assert_eq!(c.request_delay(), Duration::ZERO);
        assert!(!c.abort_on_first_auth_failure);
        assert_eq!(c.workspace, Some(PathBuf::from("/tmp/ws")));
    }
}
