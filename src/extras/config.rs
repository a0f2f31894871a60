use crate::api::{ApiClientError, ConnectionSettings, Credentials, Region};
use serde::Deserialize;
use serde_yaml::Value;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Settings as written in a YAML file. Every key is optional; missing keys keep the
/// `ConnectionSettings` defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    pub username: Option<String>,
    pub password: Option<String>,
    pub region: Option<String>,
    pub login_url: Option<String>,
    pub app_key: Option<String>,
    pub policy: Option<String>,
    pub socket_app_key: Option<String>,
    pub station_id: Option<String>,
    pub station_type: Option<String>,
    pub keepalive_secs: Option<u64>,
    pub log_level: Option<String>,
}

impl SettingsFile {
    /// Overlays the keys present in this file onto `settings`
    pub fn apply(self, mut settings: ConnectionSettings) -> Result<ConnectionSettings, ApiClientError> {
        if self.username.is_some() || self.password.is_some() {
            settings.credentials = Credentials {
                username: self.username.unwrap_or(settings.credentials.username),
                password: self.password.unwrap_or(settings.credentials.password),
            };
        }
        if let Some(region) = self.region {
            settings.region = Region::from_str(&region)?;
        }
        if let Some(login_url) = self.login_url {
            settings.login_url = Some(login_url);
        }
        if let Some(app_key) = self.app_key {
            settings.app_key = app_key;
        }
        if let Some(policy) = self.policy {
            settings.policy = policy;
        }
        if let Some(socket_app_key) = self.socket_app_key {
            settings.socket_app_key = socket_app_key;
        }
        if let Some(station_id) = self.station_id {
            settings.station.station_id = station_id;
        }
        if let Some(station_type) = self.station_type {
            settings.station.station_type = station_type;
        }
        if let Some(secs) = self.keepalive_secs {
            if secs == 0 {
                return Err(ApiClientError::Config(
                    "keepalive_secs must be greater than zero".to_string(),
                ));
            }
            settings.keepalive_interval = Duration::from_secs(secs);
        }
        if let Some(level) = self.log_level {
            settings.debugmode = log::LevelFilter::from_str(&level)
                .map_err(|_| ApiClientError::Config(format!("Unknown log level {}", level)))?;
        }
        Ok(settings)
    }
}

/// The function merges two values, either as a mapping or a sequence, into a single value.
///
/// Mappings merge key by key, recursively. Sequences are concatenated. Any other combination
/// resolves to `source`.
pub fn merge_values(destination: Value, source: Value) -> Value {
    match (destination, source) {
        (Value::Mapping(mut map1), Value::Mapping(map2)) => {
            for (key, value) in map2 {
                if let Some(existing_value) = map1.remove(&key) {
                    let merged_value = merge_values(existing_value, value);
                    map1.insert(key, merged_value);
                } else {
                    map1.insert(key, value);
                }
            }
            Value::Mapping(map1)
        }
        (Value::Sequence(mut seq1), Value::Sequence(seq2)) => {
            seq1.extend(seq2);
            Value::Sequence(seq1)
        }
        (_, value) => value,
    }
}

fn parse_yaml(contents: &str, origin: &str) -> Result<Value, ApiClientError> {
    if contents.trim().is_empty() {
        return Ok(Value::Mapping(Default::default()));
    }
    serde_yaml::from_str::<Value>(contents)
        .map_err(|e| ApiClientError::Config(format!("{}: {}", origin, e)))
}

fn settings_from_value(value: Value) -> Result<ConnectionSettings, ApiClientError> {
    let file: SettingsFile =
        serde_yaml::from_value(value).map_err(|e| ApiClientError::Config(e.to_string()))?;
    file.apply(ConnectionSettings::default())
}

/// Settings from a single YAML document
pub fn settings_from_str(yaml: &str) -> Result<ConnectionSettings, ApiClientError> {
    settings_from_value(parse_yaml(yaml, "settings")?)
}

/// Reads and merges the YAML files at `paths` in order, later files overriding earlier keys
pub fn load_settings<P: AsRef<Path>>(paths: &[P]) -> Result<ConnectionSettings, ApiClientError> {
    let mut merged = Value::Mapping(Default::default());
    for path in paths {
        let path = path.as_ref();
        log::debug!("Loading settings from {}", path.display());
        let contents = fs::read_to_string(path)
            .map_err(|e| ApiClientError::Config(format!("{}: {}", path.display(), e)))?;
        merged = merge_values(merged, parse_yaml(&contents, &path.display().to_string())?);
    }
    settings_from_value(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcc::util::generate_socket_key;

    #[test]
    fn yaml_overrides_defaults() {
        let settings = settings_from_str(
            "username: sup@example.com\npassword: secret\nregion: ldn\nkeepalive_secs: 5\nlog_level: debug\nstation_type: SOFTPHONE\n",
        )
        .unwrap();
        assert_eq!(settings.credentials.username, "sup@example.com");
        assert_eq!(settings.region, Region::LDN);
        assert_eq!(settings.keepalive_interval, Duration::from_secs(5));
        assert_eq!(settings.debugmode, log::LevelFilter::Debug);
        assert_eq!(settings.station.station_type, "SOFTPHONE");
        assert_eq!(settings.policy, "AttachExisting");
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(matches!(
            settings_from_str("region: MARS"),
            Err(ApiClientError::Config(_))
        ));
        assert!(matches!(
            settings_from_str("keepalive_secs: 0"),
            Err(ApiClientError::Config(_))
        ));
        assert!(matches!(
            settings_from_str("keepalive_secs: [1"),
            Err(ApiClientError::Config(_))
        ));
        assert!(settings_from_str("").is_ok());
    }

    #[test]
    fn files_merge_in_order() {
        let dir = std::env::temp_dir();
        let base = dir.join(format!("five9-base-{}.yaml", generate_socket_key()));
        let local = dir.join(format!("five9-local-{}.yaml", generate_socket_key()));
        fs::write(&base, "username: base\npassword: one\nregion: CA\n").unwrap();
        fs::write(&local, "password: two\nsocket_app_key: wallboard\n").unwrap();

        let settings = load_settings(&[&base, &local]).unwrap();
        assert_eq!(settings.credentials.username, "base");
        assert_eq!(settings.credentials.password, "two");
        assert_eq!(settings.region, Region::CA);
        assert_eq!(settings.socket_app_key, "wallboard");

        fs::remove_file(&base).unwrap();
        fs::remove_file(&local).unwrap();
        assert!(load_settings(&[&base]).is_err());
    }

    #[test]
    fn merge_concatenates_sequences() {
        let a: Value = serde_yaml::from_str("list: [1]\nmap: {x: 1}").unwrap();
        let b: Value = serde_yaml::from_str("list: [2]\nmap: {y: 2}").unwrap();
        let merged = merge_values(a, b);
        let expected: Value = serde_yaml::from_str("list: [1, 2]\nmap: {x: 1, y: 2}").unwrap();
        assert_eq!(merged, expected);
    }
}
