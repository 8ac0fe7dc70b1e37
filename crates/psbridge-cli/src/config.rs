//! TOML configuration for the command-line tool.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use psbridge_core::Credentials;
use psbridge_pool::PoolConfig;
use psbridge_shell::session::DEFAULT_SHELL_BIN;
use psbridge_shell::{OutputLayout, SessionBuilder};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub shell: ShellConfig,
    /// Opaque credential fields passed to the remote login command.
    pub credentials: BTreeMap<String, String>,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShellConfig {
    /// Shell binary to spawn.
    pub bin: String,
    /// Arguments keeping the shell in interactive stdin mode.
    pub args: Vec<String>,
    /// Per-command timeout.
    pub timeout_secs: u64,
    /// Output layout: "text" or "typed".
    pub layout: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            bin: DEFAULT_SHELL_BIN.to_owned(),
            args: vec!["-Command".to_owned(), "-".to_owned()],
            timeout_secs: 60,
            layout: "text".to_owned(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn layout(&self) -> anyhow::Result<OutputLayout> {
        self.shell.layout.parse().map_err(anyhow::Error::msg)
    }

    pub fn session_builder(&self) -> anyhow::Result<SessionBuilder> {
        Ok(SessionBuilder::new()
            .with_shell_bin(&self.shell.bin)
            .with_shell_args(self.shell.args.clone())
            .with_timeout(Duration::from_secs(self.shell.timeout_secs))
            .with_layout(self.layout()?))
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials.clone().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").expect("deserialize");
        assert_eq!(config.shell.bin, DEFAULT_SHELL_BIN);
        assert_eq!(config.shell.timeout_secs, 60);
        assert_eq!(config.pool, PoolConfig::default());
        assert!(config.credentials().is_empty());
        assert_eq!(config.layout().expect("layout"), OutputLayout::Text);
    }

    #[test]
    fn full_config_parses() {
        let text = r#"
[shell]
bin = "pwsh"
args = ["-NoLogo", "-Command", "-"]
timeout_secs = 30
layout = "typed"

[credentials]
UserName = "admin"
Password = "s3cret"
Domain = "internal"

[pool]
min_warm = 1
max_idle_secs = 120
"#;
        let config: Config = toml::from_str(text).expect("deserialize");
        assert_eq!(config.shell.bin, "pwsh");
        assert_eq!(config.layout().expect("layout"), OutputLayout::Typed);
        assert_eq!(config.pool.min_warm, 1);
        assert_eq!(config.pool.max_use_count, 100);
        assert_eq!(
            config.credentials().pool_key(),
            "Domain=internal/Password=s3cret/UserName=admin"
        );
        config.session_builder().expect("builder");
    }

    #[test]
    fn unknown_layout_is_rejected() {
        let config: Config =
            toml::from_str("[shell]\nlayout = \"xml\"\n").expect("deserialize");
        assert!(config.layout().is_err());
    }

    #[test]
    fn unknown_section_is_rejected() {
        assert!(toml::from_str::<Config>("[observability]\nlevel = 1\n").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[credentials]\nUserName = \"admin\"").expect("write");
        let config = Config::load(file.path()).expect("load");
        assert_eq!(config.credentials().get("UserName"), Some("admin"));

        let missing = Config::load(Path::new("/nonexistent/psbridge.toml"));
        assert!(missing.is_err());
    }
}
