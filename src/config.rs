use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub bundle: BundleConfig,
    pub identity: IdentityConfig,
    pub capture: CaptureConfig,
    pub server: ServerConfig,
}

/// The foreign vendor bundle and the page it believes it is running on.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BundleConfig {
    /// Path to the obfuscated vendor script, loaded verbatim at startup.
    pub path: PathBuf,
    /// Page URL the sandbox reports; relative URLs resolve against it.
    pub base_url: String,
    pub referrer: String,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("assets/core.js"),
            base_url: "https://www.kuaishou.com/new-reco".to_string(),
            referrer: "https://live.kuaishou.com/".to_string(),
        }
    }
}

/// Static fingerprint values the emulated environment reports.
/// These only need to be stable and plausible, not current.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IdentityConfig {
    pub user_agent: String,
    pub platform: String,
    pub languages: Vec<String>,
    /// `navigator.plugins.length` surrogate — a headless engine has 0.
    pub plugin_count: u32,
    pub screen: ScreenConfig,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            platform: "Win32".to_string(),
            languages: vec!["zh-CN".to_string(), "zh".to_string()],
            plugin_count: 3,
            screen: ScreenConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScreenConfig {
    pub width: u32,
    pub height: u32,
    pub avail_width: u32,
    pub avail_height: u32,
    pub color_depth: u32,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            avail_width: 1920,
            avail_height: 1040,
            color_depth: 24,
        }
    }
}

/// Which interception strategies are armed, and how callers wait for them.
///
/// The rule set is configuration rather than code: a bundle revision that
/// exposes its signer through a new idiom gets a new rule variant here,
/// not a rewrite of the interceptor.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    /// Entry-point name the bundle's generic dispatcher is invoked with.
    pub sentinel: String,
    /// Property name under which the signing method surfaces.
    pub property: String,
    pub rules: Vec<RuleName>,
    pub poll_interval_ms: u64,
    pub wait_timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sentinel: "$encode".to_string(),
            property: "$encode".to_string(),
            rules: vec![RuleName::InvocationSentinel, RuleName::PropertyAccessor],
            poll_interval_ms: 50,
            wait_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RuleName {
    InvocationSentinel,
    PropertyAccessor,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${BUNDLE_PATH}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to defaults.
    /// One-shot invocations usually run without a config file.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
