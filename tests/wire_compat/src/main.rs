fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use busrelay_protocol::{Batch, InboundMessage, Payload, TelemetryRecord, UplinkMessage};
    use serde_json::Value;

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Makes `60` and `60.0` compare equal. The legacy collector emitted
    /// whole numbers as integers whenever the sensor value had no fraction.
    fn normalize_value(v: &Value) -> Value {
        match v {
            Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            Value::Array(arr) => Value::Array(arr.iter().map(normalize_value).collect()),
            _ => v.clone(),
        }
    }

    fn assert_same_json(expected: &Value, actual: &Value, name: &str) {
        assert_eq!(
            normalize_value(expected),
            normalize_value(actual),
            "mismatch for {name}:\n  legacy: {expected}\n  ours:   {actual}"
        );
    }

    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_same_json(&fixture, &reserialized, name);
        parsed
    }

    // --- Collector → server frames ---

    #[test]
    fn fixture_batch_frame() {
        let batch = roundtrip_test::<Batch>("batch_frame.json");
        assert_eq!(batch.count(), 3);
        assert_eq!(batch.records().len(), 3);
        assert_eq!(batch.latest().map(|r| r.reading.passengers), Some(101));
    }

    #[test]
    fn fixture_batch_frame_as_uplink_message() {
        let fixture = load_fixture("batch_frame.json");
        let batch: Batch = serde_json::from_value(fixture.clone()).unwrap();
        let sent: Value =
            serde_json::from_str(&UplinkMessage::Batch(batch).to_json().unwrap()).unwrap();
        assert_same_json(&fixture, &sent, "batch_frame.json");
    }

    #[test]
    fn fixture_single_frame() {
        let record = roundtrip_test::<TelemetryRecord>("single_frame.json");
        assert_eq!(record.reading.latitude, Some(6.9));

        let sent: Value = serde_json::from_str(
            &UplinkMessage::Single(record).to_json().unwrap(),
        )
        .unwrap();
        assert!(sent.get("type").is_none());
    }

    #[test]
    fn fixture_single_frame_without_gps() {
        let record = roundtrip_test::<TelemetryRecord>("single_frame_no_gps.json");
        assert!(record.reading.latitude.is_none());
        assert!(record.reading.longitude.is_none());
    }

    // --- Server decoding ---

    #[test]
    fn inbound_batch_collapses_to_latest() {
        let fixture = load_fixture("batch_frame.json");
        let inbound = InboundMessage::decode(&fixture.to_string());
        assert!(matches!(inbound, InboundMessage::Batch(_)));
        assert_eq!(inbound.records().len(), 3);

        let Some(Payload::Json(latest)) = inbound.into_payload() else {
            panic!("expected a JSON payload");
        };
        assert_same_json(&fixture["data"][2], &latest, "batch_frame.json latest");
    }

    #[test]
    fn inbound_single_is_forwarded_verbatim() {
        let fixture = load_fixture("single_frame.json");
        let inbound = InboundMessage::decode(&fixture.to_string());
        assert_eq!(inbound.records().len(), 1);
        assert_eq!(inbound.into_payload(), Some(Payload::Json(fixture)));
    }

    // --- REST ---

    #[test]
    fn fixture_history_response() {
        let fixture = load_fixture("history_response.json");
        let values: Vec<TelemetryRecord> =
            serde_json::from_value(fixture["values"].clone()).unwrap();
        assert_eq!(values.len(), 2);

        let rebuilt = serde_json::json!({ "values": values });
        assert_same_json(&fixture, &rebuilt, "history_response.json");
    }

    // --- Serial input ---

    #[test]
    fn fixture_serial_lines() {
        let cases = load_fixture("serial_lines.json");
        let cases = cases.as_array().expect("fixture is an array");
        for case in cases {
            let line = case["line"].as_str().unwrap();
            let parsed = busrelay_protocol::parse_line(line)
                .map(|reading| serde_json::to_value(reading).unwrap());
            match (&case["reading"], parsed) {
                (Value::Null, None) => {}
                (expected, Some(actual)) => assert_same_json(expected, &actual, line),
                (expected, None) => panic!("line rejected, expected {expected}: {line}"),
            }
        }
    }
}
