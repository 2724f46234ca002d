//! Static deployment inventory: which rooms are monitored, which sensor
//! properties back them and which smart plugs live in each.
//!
//! This is configuration baked at compile time. The office layout changes
//! rarely enough that editing a table here beats another config surface.

/// A monitored room with its temperature/humidity property bindings.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RoomSensorBinding {
    pub room: &'static str,
    pub device_id: &'static str,
    pub temperature_id: &'static str,
    pub humidity_id: &'static str,
}

const SENSOR_DEVICE: &str = "tTeol9dV";

pub const ROOM_SENSORS: &[RoomSensorBinding] = &[
    RoomSensorBinding {
        room: "Nicole",
        device_id: SENSOR_DEVICE,
        temperature_id: "93H3xMUZGszO338S",
        humidity_id: "XZ7p0OMDMcimVdCp",
    },
    RoomSensorBinding {
        room: "Os",
        device_id: SENSOR_DEVICE,
        temperature_id: "kDcx0NwGpRLMjoC3",
        humidity_id: "QTQdMLM0KGGDjDzG",
    },
    RoomSensorBinding {
        room: "Serena",
        device_id: SENSOR_DEVICE,
        temperature_id: "jrtS6cbO4qV9xqZR",
        humidity_id: "wOqtvYqKLDuOsVH1",
    },
    RoomSensorBinding {
        room: "Gloria",
        device_id: SENSOR_DEVICE,
        temperature_id: "fCHcPi7GYsqZDq3z",
        humidity_id: "tPGJFQarC9uvBAHA",
    },
];

/// Rooms the scheduler iterates, in publish order.
pub const ACTIVE_ROOMS: &[&str] = &["Nicole", "Os", "Serena", "Gloria"];

/// Smart plugs per room, by canonical plug name.
const ROOM_PLUGS: &[(&str, &[&str])] = &[
    ("Nicole", &["PRESA_NICOLE", "PRESA_CECILIA"]),
    ("Os", &["PRESA_VITTORIA", "PRESA_RICHARD"]),
    ("Serena", &["PRESA_SERENA"]),
    ("Gloria", &["PRESA_GLORIA", "PRESA_NIBRAS"]),
];

/// Plug name to Shelly cloud device id.
const PLUG_DEVICES: &[(&str, &str)] = &[
    ("PRESA_VITTORIA", "8cbfeaa16060"),
    ("PRESA_NICOLE", "8cbfeaa953c8"),
    ("PRESA_SERENA", "8cbfeaa0fb4c"),
    ("PRESA_RICHARD", "e4b323150570"),
    ("PRESA_NIBRAS", "8cbfeaa16964"),
    ("PRESA_GLORIA", "8cbfeaa058f4"),
    ("PRESA_CECILIA", "8cbfeaa44018"),
];

pub fn sensors_for_room(room: &str) -> Option<&'static RoomSensorBinding> {
    let wanted = normalize_name(room);
    ROOM_SENSORS.iter().find(|b| normalize_name(b.room) == wanted)
}

pub fn plugs_for_room(room: &str) -> &'static [&'static str] {
    let wanted = normalize_name(room);
    ROOM_PLUGS
        .iter()
        .find(|(r, _)| normalize_name(r) == wanted)
        .map(|(_, plugs)| *plugs)
        .unwrap_or(&[])
}

pub fn plug_device_id(plug_name: &str) -> Option<&'static str> {
    let wanted = normalize_name(plug_name);
    PLUG_DEVICES
        .iter()
        .find(|(name, _)| normalize_name(name) == wanted)
        .map(|(_, id)| *id)
}

/// Room a plug belongs to. Falls back to deriving a display name from the
/// plug name itself (strip the `PRESA_` prefix, capitalize) so an unmapped
/// plug still lands somewhere readable.
pub fn derive_room(plug_name: &str) -> String {
    let wanted = normalize_name(plug_name);
    for (room, plugs) in ROOM_PLUGS {
        if plugs.iter().any(|p| normalize_name(p) == wanted) {
            return (*room).to_string();
        }
    }

    let stripped = plug_name
        .trim()
        .strip_prefix("PRESA_")
        .unwrap_or_else(|| plug_name.trim());
    let mut chars = stripped.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Canonical form for name comparison: trimmed, lowercased, separators
/// removed. Sensor labels and plug names arrive with inconsistent casing
/// and spacing across the two clouds.
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .filter(|c| *c != '_' && !c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_active_room_has_sensors_and_plugs() {
        for room in ACTIVE_ROOMS {
            assert!(sensors_for_room(room).is_some(), "sensors for {}", room);
            assert!(!plugs_for_room(room).is_empty(), "plugs for {}", room);
        }
    }

    #[test]
    fn every_mapped_plug_has_a_device_id() {
        for (_, plugs) in ROOM_PLUGS {
            for plug in *plugs {
                assert!(plug_device_id(plug).is_some(), "device id for {}", plug);
            }
        }
    }

    #[test]
    fn normalization_bridges_casing_and_separators() {
        assert_eq!(normalize_name("  Presa_Nicole "), "presanicole");
        assert_eq!(normalize_name("PRESA NICOLE"), "presanicole");
        assert_eq!(plug_device_id("presa_nicole"), Some("8cbfeaa953c8"));
        assert!(sensors_for_room("NICOLE").is_some());
    }

    #[test]
    fn derive_room_prefers_the_mapping() {
        assert_eq!(derive_room("PRESA_CECILIA"), "Nicole");
        assert_eq!(derive_room("PRESA_RICHARD"), "Os");
    }

    #[test]
    fn derive_room_falls_back_to_the_plug_name() {
        assert_eq!(derive_room("PRESA_MARCO"), "Marco");
        assert_eq!(derive_room("orphan"), "Orphan");
    }
}
