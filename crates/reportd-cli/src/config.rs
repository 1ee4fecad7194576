//! YAML configuration file.

use std::path::{Path, PathBuf};

use reportd_core::{Account, ReportError};
use reportd_core::submit::PortalSpec;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub accounts: Vec<Account>,
    pub notification: Notification,
    #[serde(default)]
    pub portal: Portal,
    /// Where the last-known-good page script is persisted.
    #[serde(rename = "baseline-path", default = "default_baseline_path")]
    pub baseline_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct Notification {
    /// PushPlus token.
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Portal {
    /// Override for the form URL, for staging portals.
    #[serde(rename = "form-url")]
    pub form_url: Option<String>,
}

fn default_baseline_path() -> PathBuf {
    PathBuf::from("config/previous.txt")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&text)
            .map_err(|e| ReportError::Config(format!("{}: {e}", path.display())))?;
        if config.accounts.is_empty() {
            return Err(ReportError::Config("No accounts configured".into()));
        }
        Ok(config)
    }

    pub fn portal_spec(&self) -> PortalSpec {
        let mut spec = PortalSpec::default();
        if let Some(url) = &self.portal.form_url {
            spec.form_url = url.clone();
        }
        spec
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const FULL: &str = r#"
accounts:
  - account-id: "2023001"
    password: "secret"
    region:
      name: "安徽省合肥市蜀山区"
      code: "340104"
  - account-id: "2023002"
    password: "hunter2"
    region:
      name: "安徽省芜湖市镜湖区"
      code: "340202"
notification:
  token: "pushplus-token"
portal:
  form-url: "http://staging.example.edu/form"
baseline-path: "state/previous.txt"
"#;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn full_config_parses() {
        let (_dir, path) = write_config(FULL);
        let config = Config::load(&path).unwrap();

        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].account_id, "2023001");
        assert_eq!(config.accounts[1].region.code, "340202");
        assert_eq!(config.notification.token, "pushplus-token");
        assert_eq!(config.baseline_path, PathBuf::from("state/previous.txt"));
        assert_eq!(
            config.portal_spec().form_url,
            "http://staging.example.edu/form"
        );
    }

    #[test]
    fn portal_and_baseline_have_defaults() {
        let yaml = r#"
accounts:
  - account-id: "2023001"
    password: "secret"
    region:
      name: "安徽省合肥市蜀山区"
      code: "340104"
notification:
  token: "tok"
"#;
        let (_dir, path) = write_config(yaml);
        let config = Config::load(&path).unwrap();

        assert_eq!(config.baseline_path, PathBuf::from("config/previous.txt"));
        assert!(config.portal_spec().form_url.contains("ahau.edu.cn"));
    }

    #[test]
    fn empty_account_list_is_rejected() {
        let yaml = "accounts: []\nnotification:\n  token: \"tok\"\n";
        let (_dir, path) = write_config(yaml);

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ReportError::Config(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Config::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, ReportError::Io(_)));
    }
}
