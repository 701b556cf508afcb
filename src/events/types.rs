/**
 * ============================================================================
 * EVENT TYPES MODULE
 * ============================================================================
 *
 * PURPOSE: Define every event the agent can emit
 *
 * WIRE SHAPE:
 * Each event serializes to one flat JSON object:
 *   {"type": "<kind>", "timestamp": "<RFC 3339 UTC>", "hostname": "...", ...}
 * The kind-specific fields sit next to the envelope fields.
 *
 * ============================================================================
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/**
 * Envelope around every event
 * timestamp is the moment the event was produced, always UTC
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, hostname: impl Into<String>, kind: EventKind) -> Self {
        Self {
            timestamp,
            hostname: hostname.into(),
            kind,
        }
    }

    /// The `type` discriminator as it appears on the wire.
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/**
 * Host fingerprint sent once per agent start
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMetadata {
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_version: Option<String>,
    pub cpu_count: usize,
    pub memory_total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_time: Option<DateTime<Utc>>,
    pub mac_addresses: Vec<String>,
    pub pid: u32,
}

/// One retained key press inside a key segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keystroke {
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

/**
 * Event kinds
 * Adding a kind means adding a variant here; serialization follows from the
 * derive, so there is no per-kind field plumbing anywhere else
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Metadata(HostMetadata),
    ForegroundChange {
        title: Option<String>,
        process_name: Option<String>,
        process_path: Option<String>,
        pid: Option<u32>,
        url: Option<String>,
    },
    ScreenTime {
        process_name: Option<String>,
        pid: Option<u32>,
        title: Option<String>,
        duration_seconds: u64,
    },
    MouseIdle {
        idle_seconds: u64,
    },
    MouseActive {
        x: f64,
        y: f64,
        idle_duration_seconds: u64,
    },
    KeyCountSegment {
        count: u64,
        keystrokes: Vec<Keystroke>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        duration_seconds: u64,
    },
    AfkStart {
        idle_seconds: u64,
    },
    AfkEnd {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        duration_seconds: u64,
    },
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::Metadata(_) => "metadata",
            EventKind::ForegroundChange { .. } => "foreground_change",
            EventKind::ScreenTime { .. } => "screen_time",
            EventKind::MouseIdle { .. } => "mouse_idle",
            EventKind::MouseActive { .. } => "mouse_active",
            EventKind::KeyCountSegment { .. } => "key_count_segment",
            EventKind::AfkStart { .. } => "afk_start",
            EventKind::AfkEnd { .. } => "afk_end",
        }
    }
}

/// Whole seconds between two instants, clamped at zero.
pub fn whole_seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_screen_time_wire_shape() {
        let event = Event::new(
            ts(0),
            "desk-01",
            EventKind::ScreenTime {
                process_name: Some("code.exe".to_string()),
                pid: Some(4242),
                title: Some("main.rs".to_string()),
                duration_seconds: 17,
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "screen_time");
        assert_eq!(value["hostname"], "desk-01");
        assert_eq!(value["duration_seconds"], 17);
        assert_eq!(value["pid"], 4242);
        assert!(value["timestamp"].as_str().unwrap().starts_with("2023-11-14T22:13:20"));
    }

    #[test]
    fn test_foreground_change_keeps_null_url() {
        let event = Event::new(
            ts(0),
            "desk-01",
            EventKind::ForegroundChange {
                title: Some("Inbox".to_string()),
                process_name: Some("outlook.exe".to_string()),
                process_path: None,
                pid: Some(10),
                url: None,
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "foreground_change");
        assert!(value.get("url").unwrap().is_null());
    }

    #[test]
    fn test_metadata_fields_flattened() {
        let event = Event::new(
            ts(0),
            "desk-01",
            EventKind::Metadata(HostMetadata {
                platform: "windows-x86_64".to_string(),
                os_version: None,
                kernel_version: None,
                cpu_count: 8,
                memory_total: 16 * 1024 * 1024 * 1024,
                disk_total: None,
                boot_time: None,
                mac_addresses: vec!["aa:bb:cc:dd:ee:ff".to_string()],
                pid: 99,
            }),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "metadata");
        assert_eq!(value["cpu_count"], 8);
        assert_eq!(value["mac_addresses"][0], "aa:bb:cc:dd:ee:ff");
        assert!(value.get("os_version").is_none());
    }

    #[test]
    fn test_fallback_line_parses_back() {
        let event = Event::new(
            ts(5),
            "desk-01",
            EventKind::AfkEnd {
                start_time: ts(0),
                end_time: ts(5),
                duration_seconds: 5,
            },
        );
        let line = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.type_name(), "afk_end");
    }

    #[test]
    fn test_whole_seconds_clamps_negative() {
        assert_eq!(whole_seconds_between(ts(10), ts(3)), 0);
        assert_eq!(whole_seconds_between(ts(3), ts(10)), 7);
    }
}
