use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use serde::Deserialize;

/// Command line options for the notice board server.
#[derive(Parser, Debug, Default)]
#[command(name = "notice_board", about = "Department notice board server")]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable verbose logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory holding snapshots, attachments and the session key.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// Built-in administrator credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub login: String,
    pub email: String,
    pub password: String,
}

impl Default for AdminAccount {
    fn default() -> Self {
        Self {
            login: "admin".into(),
            email: "admin@tpgit.edu.in".into(),
            password: "Admin123".into(),
        }
    }
}

impl std::fmt::Debug for AdminAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAccount")
            .field("login", &self.login)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Template mail API settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct MailConfig {
    #[serde(default = "default_mail_endpoint")]
    pub endpoint: String,
    pub service_id: String,
    pub template_id: String,
    pub public_key: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct OAuthConfig {
    pub userinfo_url: String,
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Base URL attachment links are built from.
    pub public_url: String,
    pub data_dir: PathBuf,
    /// Maximum attachment size in megabytes.
    pub max_upload_mb: u64,
    pub logging_enabled: bool,
    pub admin: AdminAccount,
    /// Without mail settings codes are only logged.
    pub mail: Option<MailConfig>,
    pub oauth: Option<OAuthConfig>,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    uploads: FileUploads,
    #[serde(default)]
    admin: Option<FileAdmin>,
    #[serde(default)]
    mail: Option<MailConfig>,
    #[serde(default)]
    oauth: Option<OAuthConfig>,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    public_url: Option<String>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize)]
struct FileUploads {
    #[serde(default = "default_max_upload_mb")]
    max_mb: u64,
}

#[derive(Deserialize)]
struct FileAdmin {
    login: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
}

fn default_max_upload_mb() -> u64 {
    25
}

fn default_mail_endpoint() -> String {
    "https://api.emailjs.com/api/v1.0/email/send".into()
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for FileUploads {
    fn default() -> Self {
        Self {
            max_mb: default_max_upload_mb(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("NOTICE_BOARD_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/notice_board.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };

        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;
        let mut max_upload_mb = file_cfg.uploads.max_mb;
        let mut admin = AdminAccount::default();
        if let Some(a) = file_cfg.admin {
            admin.login = a.login.unwrap_or(admin.login);
            admin.email = a.email.unwrap_or(admin.email);
            admin.password = a.password.unwrap_or(admin.password);
        }

        // environment overrides
        if let Ok(p) = std::env::var("NOTICE_BOARD_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("NOTICE_BOARD_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Some(mb) = std::env::var("MAX_UPLOAD_MB")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            max_upload_mb = mb;
        }
        if let Ok(pw) = std::env::var("NOTICE_BOARD_ADMIN_PASSWORD") {
            admin.password = pw;
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }

        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| std::env::var("DATA_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let public_url = file_cfg
            .server
            .public_url
            .unwrap_or_else(|| format!("http://{bind}"));

        Ok(Self {
            bind,
            public_url,
            data_dir,
            max_upload_mb,
            logging_enabled: logging,
            admin,
            mail: file_cfg.mail,
            oauth: file_cfg.oauth,
        })
    }

    /// Configuration for a data directory with every other value defaulted.
    pub fn for_data_dir(bind: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        let bind = bind.into();
        Self {
            public_url: format!("http://{bind}"),
            bind,
            data_dir: data_dir.into(),
            max_upload_mb: default_max_upload_mb(),
            logging_enabled: default_logging(),
            admin: AdminAccount::default(),
            mail: None,
            oauth: None,
        }
    }

    /// Helper to return the upload limit in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }
}

/// Platform data directory, falling back to the working directory.
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("edu", "tpgit", "notice_board")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./notice_board_data"))
}
