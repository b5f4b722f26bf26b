//! Telemetry field registry and streaming presets.
//!
//! Field ids and names follow the vehicle's telemetry schema; the table
//! is the single source of truth for id↔name resolution. Presets bundle
//! commonly-used field groups with per-field push intervals.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::{VlinkError, VlinkResult};

/// Field id → name, sorted by id. Deprecated and experimental slots are
/// omitted.
pub const FIELD_NAMES: &[(u16, &str)] = &[
    (1, "DriveRail"),
    (2, "ChargeState"),
    (3, "BmsFullchargecomplete"),
    (4, "VehicleSpeed"),
    (5, "Odometer"),
    (6, "PackVoltage"),
    (7, "PackCurrent"),
    (8, "Soc"),
    (9, "DCDCEnable"),
    (10, "Gear"),
    (11, "IsolationResistance"),
    (12, "PedalPosition"),
    (13, "BrakePedal"),
    (21, "Location"),
    (22, "GpsState"),
    (23, "GpsHeading"),
    (24, "NumBrickVoltageMax"),
    (25, "BrickVoltageMax"),
    (26, "NumBrickVoltageMin"),
    (27, "BrickVoltageMin"),
    (28, "NumModuleTempMax"),
    (29, "ModuleTempMax"),
    (30, "NumModuleTempMin"),
    (31, "ModuleTempMin"),
    (32, "RatedRange"),
    (33, "Hvil"),
    (34, "DCChargingEnergyIn"),
    (35, "DCChargingPower"),
    (36, "ACChargingEnergyIn"),
    (37, "ACChargingPower"),
    (38, "ChargeLimitSoc"),
    (39, "FastChargerPresent"),
    (40, "EstBatteryRange"),
    (41, "IdealBatteryRange"),
    (42, "BatteryLevel"),
    (43, "TimeToFullCharge"),
    (44, "ScheduledChargingStartTime"),
    (45, "ScheduledChargingPending"),
    (46, "ScheduledDepartureTime"),
    (47, "PreconditioningEnabled"),
    (48, "ScheduledChargingMode"),
    (49, "ChargeAmps"),
    (50, "ChargeEnableRequest"),
    (51, "ChargerPhases"),
    (52, "ChargePortColdWeatherMode"),
    (53, "ChargeCurrentRequest"),
    (54, "ChargeCurrentRequestMax"),
    (55, "BatteryHeaterOn"),
    (56, "NotEnoughPowerToHeat"),
    (57, "SuperchargerSessionTripPlanner"),
    (58, "DoorState"),
    (59, "Locked"),
    (60, "FdWindow"),
    (61, "FpWindow"),
    (62, "RdWindow"),
    (63, "RpWindow"),
    (64, "VehicleName"),
    (65, "SentryMode"),
    (66, "SpeedLimitMode"),
    (67, "CurrentLimitMph"),
    (68, "Version"),
    (69, "TpmsPressureFl"),
    (70, "TpmsPressureFr"),
    (71, "TpmsPressureRl"),
    (72, "TpmsPressureRr"),
    (81, "TpmsLastSeenPressureTimeFl"),
    (82, "TpmsLastSeenPressureTimeFr"),
    (83, "TpmsLastSeenPressureTimeRl"),
    (84, "TpmsLastSeenPressureTimeRr"),
    (85, "InsideTemp"),
    (86, "OutsideTemp"),
    (87, "SeatHeaterLeft"),
    (88, "SeatHeaterRight"),
    (89, "SeatHeaterRearLeft"),
    (90, "SeatHeaterRearRight"),
    (91, "SeatHeaterRearCenter"),
    (92, "AutoSeatClimateLeft"),
    (93, "AutoSeatClimateRight"),
    (94, "DriverSeatBelt"),
    (95, "PassengerSeatBelt"),
    (96, "DriverSeatOccupied"),
    (98, "LateralAcceleration"),
    (99, "LongitudinalAcceleration"),
    (101, "CruiseSetSpeed"),
    (102, "LifetimeEnergyUsed"),
    (103, "LifetimeEnergyUsedDrive"),
    (106, "BrakePedalPos"),
    (107, "RouteLastUpdated"),
    (108, "RouteLine"),
    (109, "MilesToArrival"),
    (110, "MinutesToArrival"),
    (111, "OriginLocation"),
    (112, "DestinationLocation"),
    (113, "CarType"),
    (114, "Trim"),
    (115, "ExteriorColor"),
    (116, "RoofColor"),
    (117, "ChargePort"),
    (118, "ChargePortLatch"),
    (123, "GuestModeEnabled"),
    (124, "PinToDriveEnabled"),
    (125, "PairedPhoneKeyAndKeyFobQty"),
    (126, "CruiseFollowDistance"),
    (129, "SpeedLimitWarning"),
    (158, "EnergyRemaining"),
    (159, "ServiceMode"),
    (160, "BMSState"),
    (161, "GuestModeMobileAccessState"),
    (163, "DestinationName"),
    (179, "DetailedChargeState"),
    (180, "CabinOverheatProtectionMode"),
    (181, "CabinOverheatProtectionTemperatureLimit"),
    (182, "CenterDisplay"),
    (183, "ChargePortDoorOpen"),
    (184, "ChargerVoltage"),
    (185, "ChargingCableType"),
    (186, "ClimateKeeperMode"),
    (187, "DefrostForPreconditioning"),
    (188, "DefrostMode"),
    (189, "EfficiencyPackage"),
    (190, "EstimatedHoursToChargeTermination"),
    (191, "EuropeVehicle"),
    (192, "ExpectedEnergyPercentAtTripArrival"),
    (193, "FastChargerType"),
    (194, "HomelinkDeviceCount"),
    (195, "HomelinkNearby"),
    (196, "HvacACEnabled"),
    (197, "HvacAutoMode"),
    (198, "HvacFanSpeed"),
    (199, "HvacFanStatus"),
    (200, "HvacLeftTemperatureRequest"),
    (201, "HvacPower"),
    (202, "HvacRightTemperatureRequest"),
    (203, "HvacSteeringWheelHeatAuto"),
    (204, "HvacSteeringWheelHeatLevel"),
    (206, "PowershareHoursLeft"),
    (207, "PowershareInstantaneousPowerKW"),
    (208, "PowershareStatus"),
    (209, "PowershareStopReason"),
    (210, "PowershareType"),
    (211, "RearDisplayHvacEnabled"),
    (212, "RearSeatHeaters"),
    (213, "RemoteStartEnabled"),
    (214, "RightHandDrive"),
    (215, "RouteTrafficMinutesDelay"),
    (216, "SoftwareUpdateDownloadPercentComplete"),
    (217, "SoftwareUpdateExpectedDurationMinutes"),
    (218, "SoftwareUpdateInstallationPercentComplete"),
    (219, "SoftwareUpdateScheduledStartTime"),
    (220, "SoftwareUpdateVersion"),
    (221, "TonneauOpenPercent"),
    (222, "TonneauPosition"),
    (223, "TonneauTentMode"),
    (224, "TpmsHardWarnings"),
    (225, "TpmsSoftWarnings"),
    (226, "ValetModeEnabled"),
    (227, "WheelType"),
    (228, "WiperHeatEnabled"),
    (229, "LocatedAtHome"),
    (230, "LocatedAtWork"),
    (231, "LocatedAtFavorite"),
    (232, "SettingDistanceUnit"),
    (233, "SettingTemperatureUnit"),
    (234, "Setting24HourTime"),
    (235, "SettingTirePressureUnit"),
    (236, "SettingChargeUnit"),
    (237, "ClimateSeatCoolingFrontLeft"),
    (238, "ClimateSeatCoolingFrontRight"),
    (239, "LightsHazardsActive"),
    (240, "LightsTurnSignal"),
    (241, "LightsHighBeams"),
    (242, "MediaPlaybackStatus"),
    (243, "MediaPlaybackSource"),
    (244, "MediaAudioVolume"),
    (245, "MediaNowPlayingDuration"),
    (246, "MediaNowPlayingElapsed"),
    (247, "MediaNowPlayingArtist"),
    (248, "MediaNowPlayingTitle"),
    (249, "MediaNowPlayingAlbum"),
    (250, "MediaNowPlayingStation"),
    (251, "MediaAudioVolumeIncrement"),
    (252, "MediaAudioVolumeMax"),
    (253, "SunroofInstalled"),
    (254, "SeatVentEnabled"),
    (255, "RearDefrostEnabled"),
    (256, "ChargeRateMilePerHour"),
];

/// Resolve a field id to its registry name.
#[must_use]
pub fn field_name(id: u16) -> Option<&'static str> {
    FIELD_NAMES
        .binary_search_by_key(&id, |(k, _)| *k)
        .ok()
        .map(|i| FIELD_NAMES[i].1)
}

/// Resolve a field name to its registry id.
#[must_use]
pub fn field_id(name: &str) -> Option<u16> {
    static BY_NAME: OnceLock<BTreeMap<&'static str, u16>> = OnceLock::new();
    BY_NAME
        .get_or_init(|| FIELD_NAMES.iter().map(|(id, name)| (*name, *id)).collect())
        .get(name)
        .copied()
}

/// Per-field streaming configuration posted to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub interval_seconds: u32,
}

pub type FieldSet = BTreeMap<String, FieldConfig>;

const DEFAULT_INTERVAL: u32 = 10;

fn set(entries: &[(&str, u32)]) -> FieldSet {
    entries
        .iter()
        .map(|(name, interval)| {
            (
                (*name).to_string(),
                FieldConfig {
                    interval_seconds: *interval,
                },
            )
        })
        .collect()
}

/// Preset names accepted by [`resolve_fields`].
pub const PRESET_NAMES: [&str; 5] = ["default", "driving", "charging", "climate", "all"];

/// Look up a named preset.
#[must_use]
pub fn preset(name: &str) -> Option<FieldSet> {
    match name {
        "default" => Some(set(&[
            ("Soc", 10),
            ("VehicleSpeed", 1),
            ("Location", 5),
            ("ChargeState", 10),
            ("InsideTemp", 30),
            ("OutsideTemp", 60),
            ("Odometer", 60),
            ("BatteryLevel", 10),
            ("Gear", 1),
            ("PackVoltage", 10),
            ("PackCurrent", 10),
        ])),
        "driving" => Some(set(&[
            ("VehicleSpeed", 1),
            ("Location", 1),
            ("Gear", 1),
            ("GpsHeading", 1),
            ("Odometer", 10),
            ("BatteryLevel", 10),
            ("Soc", 10),
            ("PackCurrent", 5),
            ("PackVoltage", 5),
            ("CruiseSetSpeed", 5),
            ("LateralAcceleration", 5),
            ("LongitudinalAcceleration", 5),
            ("BrakePedalPos", 5),
            ("PedalPosition", 5),
        ])),
        "charging" => Some(set(&[
            ("Soc", 5),
            ("BatteryLevel", 5),
            ("PackVoltage", 5),
            ("PackCurrent", 5),
            ("ChargeState", 5),
            ("ChargeAmps", 5),
            ("ChargerVoltage", 5),
            ("ChargerPhases", 30),
            ("ACChargingPower", 5),
            ("DCChargingPower", 5),
            ("TimeToFullCharge", 30),
            ("ChargeLimitSoc", 60),
            ("ChargePortDoorOpen", 60),
            ("BatteryHeaterOn", 30),
            ("InsideTemp", 60),
        ])),
        "climate" => Some(set(&[
            ("InsideTemp", 10),
            ("OutsideTemp", 30),
            ("HvacLeftTemperatureRequest", 30),
            ("HvacRightTemperatureRequest", 30),
            ("HvacPower", 10),
            ("HvacFanStatus", 10),
            ("SeatHeaterLeft", 30),
            ("SeatHeaterRight", 30),
            ("HvacSteeringWheelHeatLevel", 30),
            ("CabinOverheatProtectionMode", 60),
            ("DefrostMode", 30),
            ("PreconditioningEnabled", 30),
        ])),
        "all" => Some(
            FIELD_NAMES
                .iter()
                .map(|(_, name)| {
                    (
                        (*name).to_string(),
                        FieldConfig {
                            interval_seconds: 30,
                        },
                    )
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Resolve a `--fields` argument: a preset name or a comma-separated
/// list of field names. `interval_override` rewrites every interval.
pub fn resolve_fields(spec: &str, interval_override: Option<u32>) -> VlinkResult<FieldSet> {
    let mut fields = match preset(spec) {
        Some(preset) => preset,
        None => {
            let mut out = FieldSet::new();
            for name in spec.split(',') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                if field_id(name).is_none() {
                    return Err(VlinkError::InvalidParams(format!(
                        "unknown telemetry field '{name}'; presets: {}",
                        PRESET_NAMES.join(", ")
                    )));
                }
                out.insert(
                    name.to_string(),
                    FieldConfig {
                        interval_seconds: DEFAULT_INTERVAL,
                    },
                );
            }
            out
        }
    };

    if let Some(interval) = interval_override {
        for config in fields.values_mut() {
            config.interval_seconds = interval;
        }
    }
    Ok(fields)
}
