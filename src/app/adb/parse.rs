use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::DeviceSummary;

pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let serial = tokens.next()?.to_string();
            let state = tokens.next()?.to_string();
            Some(DeviceSummary { serial, state })
        })
        .collect()
}

fn emulator_serial_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^emulator-(\d+)$").expect("valid emulator serial regex"))
}

/// Console port encoded in an `emulator-<port>` serial.
pub fn emulator_port(serial: &str) -> Option<u16> {
    emulator_serial_regex()
        .captures(serial.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|port| port.as_str().parse().ok())
}

/// Emulators that adb reports as fully connected, in listing order.
pub fn connected_emulators(devices: &[DeviceSummary]) -> Vec<(String, u16)> {
    devices
        .iter()
        .filter(|device| device.state == "device")
        .filter_map(|device| emulator_port(&device.serial).map(|port| (device.serial.clone(), port)))
        .collect()
}

/// `adb emu avd name` prints the name followed by `OK`.
pub fn parse_avd_name(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// `emulator -list-avds` prints one name per line, sometimes mixed with
/// `INFO    | ...` diagnostics. AVD names never contain whitespace.
pub fn parse_list_avds(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.contains(char::is_whitespace))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_adb_devices_output() {
        let output = "* daemon not running; starting now at tcp:5037\n* daemon started successfully\nList of devices attached\nemulator-5554\tdevice\nemulator-5556\toffline\n0123456789ABCDEF\tunauthorized\n\n";
        let parsed = parse_adb_devices(output);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].serial, "emulator-5554");
        assert_eq!(parsed[0].state, "device");
        assert_eq!(parsed[1].state, "offline");
        assert_eq!(parsed[2].serial, "0123456789ABCDEF");
    }

    #[test]
    fn extracts_emulator_ports() {
        assert_eq!(emulator_port("emulator-5554"), Some(5554));
        assert_eq!(emulator_port(" emulator-5586 "), Some(5586));
        assert_eq!(emulator_port("emulator-"), None);
        assert_eq!(emulator_port("emulator-99999"), None);
        assert_eq!(emulator_port("0123456789ABCDEF"), None);
        assert_eq!(emulator_port("my-emulator-5554"), None);
    }

    #[test]
    fn keeps_only_connected_emulators_in_order() {
        let devices = parse_adb_devices(
            "List of devices attached\nemulator-5556\tdevice\nemulator-5554\toffline\nR58M\tdevice\nemulator-5558\tunauthorized\nemulator-5560\tdevice\n",
        );
        assert_eq!(
            connected_emulators(&devices),
            vec![
                ("emulator-5556".to_string(), 5556),
                ("emulator-5560".to_string(), 5560)
            ]
        );
    }

    #[test]
    fn avd_name_is_first_non_empty_line() {
        assert_eq!(parse_avd_name("Pixel_5\nOK\n").as_deref(), Some("Pixel_5"));
        assert_eq!(parse_avd_name("\r\n  Pixel_6 \r\nOK\r\n").as_deref(), Some("Pixel_6"));
        assert_eq!(parse_avd_name("  \n"), None);
    }

    #[test]
    fn list_avds_skips_diagnostics() {
        let output = "INFO    | Storing crashdata in: /tmp/android/emu-crash.db\nPixel_5\n\n  Pixel_6_API_34  \n";
        assert_eq!(parse_list_avds(output), vec!["Pixel_5", "Pixel_6_API_34"]);
    }
}
