fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use wizlink_protocol::constants;
    use wizlink_protocol::{AgentInfo, DeviceAnnouncement, ErrorCode, StartupAnnouncement};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent comparison).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  Rust: {reserialized}"
        );
        parsed
    }

    fn fixture_str<'a>(fixture: &'a serde_json::Value, key: &str) -> &'a str {
        fixture[key]
            .as_str()
            .unwrap_or_else(|| panic!("fixture field {key} missing"))
    }

    fn fixture_u64(fixture: &serde_json::Value, key: &str) -> u64 {
        fixture[key]
            .as_u64()
            .unwrap_or_else(|| panic!("fixture field {key} missing"))
    }

    fn from_hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    // --- Device discovery ---

    #[test]
    fn fixture_device_announcement() {
        let announcement: DeviceAnnouncement = roundtrip_test("device_announcement.json");
        assert_eq!(announcement.device_type, constants::DEVICE_TYPE);
        assert_eq!(announcement.hostname, constants::DEVICE_HOSTNAME);
    }

    #[test]
    fn fixture_startup_announcement() {
        let announcement: StartupAnnouncement = roundtrip_test("startup_announcement.json");
        assert_eq!(announcement.announce, constants::DEVICE_ANNOUNCE_KIND);
        assert_eq!(announcement.device_type, constants::DEVICE_TYPE);

        // Key order is fixed on the wire.
        let data = fs::read_to_string(fixtures_dir().join("startup_announcement.json")).unwrap();
        let compact: String = data.split_whitespace().collect();
        assert_eq!(serde_json::to_string(&announcement).unwrap(), compact);
    }

    #[test]
    fn announcement_without_version_is_accepted() {
        let json = r#"{"hostname": "old", "ip": "10.0.0.2", "type": "uros_edge"}"#;
        let a: DeviceAnnouncement = serde_json::from_str(json).unwrap();
        assert!(a.version.is_empty());

        let back = serde_json::to_value(&a).unwrap();
        assert!(back.get("version").is_none(), "empty version must be omitted");
    }

    #[test]
    fn fixture_discovery_datagrams() {
        let fixture = load_fixture("discovery_datagrams.json");
        assert_eq!(
            fixture_str(&fixture, "agentRequest").as_bytes(),
            constants::UROS_DISCOVERY_REQUEST
        );
        assert_eq!(
            fixture_str(&fixture, "agentSignature").as_bytes(),
            constants::UROS_DISCOVERY_SIGNATURE
        );
        assert_eq!(
            fixture_u64(&fixture, "agentDiscoveryPort"),
            u64::from(constants::UROS_DISCOVERY_PORT)
        );
        assert_eq!(
            fixture_u64(&fixture, "agentPort"),
            u64::from(constants::UROS_AGENT_PORT)
        );
        assert_eq!(
            fixture_str(&fixture, "deviceProbe").as_bytes(),
            constants::DEVICE_DISCOVERY_PROBE
        );
        assert_eq!(
            fixture_u64(&fixture, "devicePort"),
            u64::from(constants::DEVICE_DISCOVERY_PORT)
        );
    }

    // --- micro-ROS transport ---

    #[test]
    fn fixture_agent_info() {
        let agent: AgentInfo = roundtrip_test("agent_info.json");
        assert_eq!(agent, AgentInfo::fallback());
    }

    #[test]
    fn fixture_error_codes() {
        let fixture = load_fixture("error_codes.json");
        let codes = fixture.as_object().unwrap();
        assert_eq!(codes.len(), 7);

        for (name, value) in codes {
            let raw = value.as_i64().unwrap() as i8;
            let code = ErrorCode::try_from(raw)
                .unwrap_or_else(|e| panic!("{name}: {e}"));
            assert_eq!(code.as_i8(), raw);
            assert_eq!(
                serde_json::to_value(code).unwrap(),
                serde_json::Value::String(name.clone()),
                "serde name for {raw}"
            );
        }
    }

    #[test]
    fn connection_state_names() {
        use wizlink_transport::ConnectionState;

        for (state, name) in [
            (ConnectionState::Disconnected, "disconnected"),
            (ConnectionState::Connecting, "connecting"),
            (ConnectionState::Connected, "connected"),
            (ConnectionState::Error, "error"),
        ] {
            assert_eq!(serde_json::to_value(state).unwrap(), name);
            assert_eq!(state.to_string(), name);
        }
    }

    // --- ICMP ---

    #[test]
    fn fixture_icmp_echo() {
        let fixture = load_fixture("icmp_echo.json");
        let identifier = fixture_u64(&fixture, "identifier") as u16;
        let sequence = fixture_u64(&fixture, "sequence") as u16;
        let request = from_hex(fixture_str(&fixture, "request"));
        let reply = from_hex(fixture_str(&fixture, "reply"));

        assert_eq!(identifier, constants::PING_IDENTIFIER);

        let payload: Vec<u8> = (0..constants::PING_PAYLOAD_LEN).map(|i| i as u8).collect();
        let built = wizlink_netif::icmp::build_echo_request(identifier, sequence, &payload);
        assert_eq!(built, request, "echo request bytes");
        assert_eq!(wizlink_netif::icmp::echo_reply(&request).unwrap(), reply);
    }
}
