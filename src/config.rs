//! Optional `nagare.toml` in the project root.
//!
//! Every field has a default, so the file may be missing or only override a
//! few keys. The source and output layout is fixed and cannot be configured.

use std::fs;
use std::io;

use camino::Utf8Path;
use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "nagare.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub targets: TargetsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP port of the static server.
    pub port: u16,
    /// Preferred WebSocket port of the reload channel.
    pub reload_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            reload_port: 1337,
        }
    }
}

/// External programs. Conversion commands are argument templates where
/// `{input}` and `{output}` are replaced with file paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub esbuild: String,
    pub woff: Vec<String>,
    pub woff2: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let strings = |args: &[&str]| args.iter().map(|s| s.to_string()).collect();

        Self {
            esbuild: "esbuild".into(),
            woff: strings(&[
                "pyftsubset",
                "{input}",
                "--unicodes=*",
                "--glyphs=*",
                "--layout-features=*",
                "--name-IDs=*",
                "--notdef-outline",
                "--flavor=woff",
                "--output-file={output}",
            ]),
            woff2: strings(&[
                "fonttools",
                "ttLib.woff2",
                "compress",
                "-o",
                "{output}",
                "{input}",
            ]),
        }
    }
}

/// Browser baselines for production output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetsConfig {
    /// Syntax level scripts are lowered to.
    pub scripts: String,
    /// Engines styles are prefixed for.
    pub styles: Vec<String>,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            scripts: "es2015".into(),
            styles: ["chrome49", "edge15", "firefox45", "safari9", "ios9", "opera36"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl Config {
    /// Reads `nagare.toml` from `root`, falling back to defaults when the
    /// file does not exist.
    pub fn load(root: &Utf8Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(path, e)),
        };

        let config = toml::from_str(&text).map_err(|e| ConfigError::Parse(path, e))?;
        tracing::debug!(?config, "loaded {CONFIG_FILE}");

        Ok(config)
    }
}
