use serde_json::{Map, Value};
use tokio::sync::RwLock;

pub const DEFAULT_TIMEZONE: &str = "Asia/Jakarta";

pub type SettingsMap = Map<String, Value>;

/// Flat in-memory application settings. Updates are shallow merges with no
/// schema: unknown keys are accepted and existing keys are overwritten.
pub struct Settings {
    values: RwLock<SettingsMap>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut values = Map::new();
        values.insert("timezone".into(), Value::String(DEFAULT_TIMEZONE.into()));
        Self {
            values: RwLock::new(values),
        }
    }
}

impl Settings {
    pub async fn get(&self) -> SettingsMap {
        self.values.read().await.clone()
    }

    pub async fn merge(&self, partial: SettingsMap) -> SettingsMap {
        let mut values = self.values.write().await;
        for (key, value) in partial {
            values.insert(key, value);
        }
        values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(v: Value) -> SettingsMap {
        match v {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn default_timezone() {
        let settings = Settings::default();
        assert_eq!(settings.get().await, as_map(json!({"timezone": "Asia/Jakarta"})));
    }

    #[tokio::test]
    async fn merge_overwrites_only_given_keys() {
        let settings = Settings::default();
        let merged = settings.merge(as_map(json!({"timezone": "UTC"}))).await;
        assert_eq!(merged, as_map(json!({"timezone": "UTC"})));

        let merged = settings.merge(as_map(json!({"autoReply": true}))).await;
        assert_eq!(merged, as_map(json!({"timezone": "UTC", "autoReply": true})));
        assert_eq!(settings.get().await, merged);
    }
}
