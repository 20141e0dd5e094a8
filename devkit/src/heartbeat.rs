/*!
Heartbeat payload builder

Produces the JSON a fleet node sends over UDP or MQTT, so tests go through
the same decoding path as real traffic.
*/

use serde_json::{json, Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct HeartbeatBuilder {
    fields: Map<String, Value>,
}

impl HeartbeatBuilder {
    pub fn new<S: Into<String>>(node: S) -> Self {
        let mut fields = Map::new();
        fields.insert("node".into(), Value::String(node.into()));
        Self { fields }
    }

    /// Reported timestamp. Without one the kernel stamps receipt time.
    pub fn at(mut self, ts: OffsetDateTime) -> Self {
        let formatted = ts.format(&Rfc3339).unwrap_or_default();
        self.fields.insert("timestamp".into(), Value::String(formatted));
        self
    }

    pub fn address<S: Into<String>>(mut self, address: S) -> Self {
        self.fields.insert("address".into(), Value::String(address.into()));
        self
    }

    pub fn platform<S: Into<String>>(mut self, platform: S) -> Self {
        self.fields.insert("system".into(), json!({ "platform": platform.into() }));
        self
    }

    pub fn cpu(mut self, percent: f32) -> Self {
        self.fields.insert("cpu".into(), json!(percent));
        self
    }

    pub fn memory(mut self, percent: f32) -> Self {
        self.fields.insert("memory".into(), json!({ "percent": percent }));
        self
    }

    pub fn disk(mut self, percent: f32) -> Self {
        self.fields.insert("disk".into(), json!({ "percent": percent }));
        self
    }

    pub fn network(mut self, bytes_recv: u64, bytes_sent: u64) -> Self {
        self.fields
            .insert("network".into(), json!({ "bytes_recv": bytes_recv, "bytes_sent": bytes_sent }));
        self
    }

    pub fn temperature(mut self, celsius: f32) -> Self {
        self.fields.insert("temperature".into(), json!({ "cpu": [{ "current": celsius }] }));
        self
    }

    pub fn build(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.build().to_string().into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn builds_the_wire_shape() {
        let hb = HeartbeatBuilder::new("relay-7")
            .at(datetime!(2026-01-01 0:00:30 UTC))
            .platform("linux")
            .cpu(25.5)
            .memory(60.0)
            .network(10, 20)
            .temperature(48.0)
            .build();

        assert_eq!(hb["node"], "relay-7");
        assert_eq!(hb["timestamp"], "2026-01-01T00:00:30Z");
        assert_eq!(hb["system"]["platform"], "linux");
        assert_eq!(hb["cpu"], 25.5);
        assert_eq!(hb["memory"]["percent"], 60.0);
        assert_eq!(hb["network"]["bytes_sent"], 20);
        assert_eq!(hb["temperature"]["cpu"][0]["current"], 48.0);
        assert!(hb.get("disk").is_none());
    }
}
