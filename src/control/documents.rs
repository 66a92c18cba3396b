//! Typed views of the TestConfig and TestParams control documents.
//!
//! Supervisors forward full iperf-style objects, so unknown keys are ignored.
//! Flags such as `udp` count as set whenever the key is present, whatever its
//! value.

use serde::de::{Deserializer, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Test configuration: where to connect and how to report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Host name or address literal of the data target.
    pub target: String,
    /// Data port on the target.
    pub data_port: u16,
    /// Hex-encoded session cookie (74 characters for 37 bytes).
    pub cookie: String,
    /// Report interval in seconds.
    pub interval: f64,
    #[serde(rename = "MSS", default, skip_serializing_if = "Option::is_none")]
    pub mss: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,
}

impl TestConfig {
    pub fn from_document(doc: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(doc)
    }

    /// Payload size hint: `MSS`, else `len`, else `default`.
    pub fn payload_size(&self, default: usize) -> usize {
        self.mss.or(self.len).unwrap_or(default)
    }
}

/// Test parameters: transport, address family and duration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestParams {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "is_false")]
    pub version4: bool,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "is_false")]
    pub version6: bool,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "is_false")]
    pub udp: bool,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "is_false")]
    pub udp_counters_64bit: bool,
    /// Test duration in seconds.
    pub time: f64,
}

impl TestParams {
    pub fn from_document(doc: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(doc)
    }
}

/// Deserializer for presence flags: only called when the key exists.
fn present<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    IgnoredAny::deserialize(deserializer)?;
    Ok(true)
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(extra: Value) -> TestConfig {
        let mut doc = json!({
            "target": "127.0.0.1",
            "data_port": 5001,
            "cookie": "0".repeat(74),
            "interval": 1
        });
        if let (Some(base), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        TestConfig::from_document(doc).unwrap()
    }

    #[test]
    fn test_config_integer_interval() {
        let cfg = config(json!({}));
        assert_eq!(cfg.target, "127.0.0.1");
        assert_eq!(cfg.data_port, 5001);
        assert_eq!(cfg.interval, 1.0);
        assert_eq!(cfg.mss, None);
        assert_eq!(cfg.len, None);
    }

    #[test]
    fn test_config_fractional_interval() {
        let cfg = config(json!({"interval": 0.25}));
        assert_eq!(cfg.interval, 0.25);
    }

    #[test]
    fn test_payload_size_precedence() {
        assert_eq!(config(json!({})).payload_size(8192), 8192);
        assert_eq!(config(json!({"len": 1000})).payload_size(8192), 1000);
        assert_eq!(config(json!({"MSS": 1400})).payload_size(8192), 1400);
        assert_eq!(
            config(json!({"MSS": 1400, "len": 1000})).payload_size(8192),
            1400
        );
    }

    #[test]
    fn test_config_ignores_unknown_keys() {
        let cfg = config(json!({"plugin": null, "bitrate": "10M", "omit": 0}));
        assert_eq!(cfg.data_port, 5001);
    }

    #[test]
    fn test_config_missing_target_is_error() {
        let doc = json!({"data_port": 5001, "cookie": "", "interval": 1});
        assert!(TestConfig::from_document(doc).is_err());
    }

    #[test]
    fn test_config_port_out_of_range_is_error() {
        let doc = json!({"target": "h", "data_port": 70000, "cookie": "", "interval": 1});
        assert!(TestConfig::from_document(doc).is_err());
    }

    #[test]
    fn test_params_defaults_to_tcp_any_family() {
        let params = TestParams::from_document(json!({"time": 2})).unwrap();
        assert!(!params.udp);
        assert!(!params.version4);
        assert!(!params.version6);
        assert!(!params.udp_counters_64bit);
        assert_eq!(params.time, 2.0);
    }

    #[test]
    fn test_params_presence_flags_ignore_value() {
        let params = TestParams::from_document(json!({
            "time": 0.5,
            "udp": false,
            "version6": null,
            "udp_counters_64bit": 1
        }))
        .unwrap();
        assert!(params.udp);
        assert!(params.version6);
        assert!(params.udp_counters_64bit);
        assert!(!params.version4);
        assert_eq!(params.time, 0.5);
    }

    #[test]
    fn test_params_missing_time_is_error() {
        assert!(TestParams::from_document(json!({"udp": true})).is_err());
    }

    #[test]
    fn test_params_serialize_omits_unset_flags() {
        let params = TestParams {
            udp: true,
            time: 3.0,
            ..Default::default()
        };
        let doc = serde_json::to_value(&params).unwrap();
        assert_eq!(doc, json!({"udp": true, "time": 3.0}));
        assert_eq!(TestParams::from_document(doc).unwrap(), params);
    }
}
