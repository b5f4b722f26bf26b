// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Static command registry.
//!
//! Maps fleet command names to their routing domain and signing
//! requirement. `wake_up` and the managed-charging endpoints broadcast
//! to the whole vehicle and take the unsigned REST path; everything
//! else is domain-addressed and signed.

use prost::Message;
use serde_json::Value;

use vlink_protocol::vehicle::VehicleAction;
use vlink_protocol::Domain;

/// Routing target for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDomain {
    Domain(Domain),
    /// Whole-vehicle endpoint, never signed.
    Broadcast,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub domain: CommandDomain,
    pub requires_signing: bool,
}

const fn security(name: &'static str) -> CommandSpec {
    CommandSpec {
        name,
        domain: CommandDomain::Domain(Domain::VehicleSecurity),
        requires_signing: true,
    }
}

const fn infotainment(name: &'static str) -> CommandSpec {
    CommandSpec {
        name,
        domain: CommandDomain::Domain(Domain::Infotainment),
        requires_signing: true,
    }
}

const fn broadcast(name: &'static str) -> CommandSpec {
    CommandSpec {
        name,
        domain: CommandDomain::Broadcast,
        requires_signing: false,
    }
}

/// The full command table.
pub const COMMANDS: &[CommandSpec] = &[
    infotainment("add_charge_schedule"),
    infotainment("add_precondition_schedule"),
    infotainment("adjust_volume"),
    security("actuate_trunk"),
    infotainment("auto_conditioning_start"),
    infotainment("auto_conditioning_stop"),
    infotainment("cancel_software_update"),
    infotainment("charge_max_range"),
    infotainment("charge_port_door_close"),
    infotainment("charge_port_door_open"),
    infotainment("charge_standard"),
    infotainment("charge_start"),
    infotainment("charge_stop"),
    security("door_lock"),
    security("door_unlock"),
    security("erase_user_data"),
    security("flash_lights"),
    security("guest_mode"),
    security("honk_horn"),
    infotainment("media_next_fav"),
    infotainment("media_next_track"),
    infotainment("media_prev_fav"),
    infotainment("media_prev_track"),
    infotainment("media_toggle_playback"),
    infotainment("media_volume_down"),
    infotainment("media_volume_up"),
    infotainment("navigation_gps_request"),
    infotainment("navigation_sc_request"),
    infotainment("navigation_waypoints_request"),
    infotainment("remote_auto_seat_climate_request"),
    infotainment("remote_auto_steering_wheel_heat_climate_request"),
    infotainment("remote_boombox"),
    infotainment("remote_seat_cooler_request"),
    infotainment("remote_seat_heater_request"),
    security("remote_start_drive"),
    infotainment("remote_steering_wheel_heat_level_request"),
    infotainment("remote_steering_wheel_heater_request"),
    security("reset_pin_to_drive_pin"),
    security("reset_valet_pin"),
    infotainment("schedule_software_update"),
    infotainment("set_bioweapon_mode"),
    infotainment("set_cabin_overheat_protection"),
    infotainment("set_charge_limit"),
    infotainment("set_charging_amps"),
    infotainment("set_climate_keeper_mode"),
    infotainment("set_cop_temp"),
    broadcast("set_managed_charge_current_request"),
    broadcast("set_managed_charger_location"),
    broadcast("set_managed_scheduled_charging_time"),
    security("set_pin_to_drive"),
    infotainment("set_preconditioning_max"),
    infotainment("set_scheduled_charging"),
    infotainment("set_scheduled_departure"),
    security("set_sentry_mode"),
    infotainment("set_temps"),
    security("set_valet_mode"),
    security("set_vehicle_name"),
    infotainment("share"),
    security("speed_limit_activate"),
    security("speed_limit_clear_pin"),
    security("speed_limit_deactivate"),
    security("speed_limit_set_limit"),
    security("sun_roof_control"),
    security("trigger_homelink"),
    infotainment("upcoming_calendar_entries"),
    broadcast("wake_up"),
    security("window_control"),
    infotainment("remove_charge_schedule"),
    infotainment("remove_precondition_schedule"),
    infotainment("set_cabin_overheat_protection_temp"),
    infotainment("set_charge_schedule_window"),
    security("set_guest_mode_mobile_access"),
    infotainment("set_vehicle_keeper_mode"),
    security("set_windows_vent"),
    infotainment("media_request"),
];

/// Look up a command by its fleet name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Build the domain payload for a signed command.
#[must_use]
pub fn build_payload(name: &str, params: &Value) -> Vec<u8> {
    VehicleAction {
        name: name.to_string(),
        params_json: if params.is_null() {
            String::new()
        } else {
            params.to_string()
        },
    }
    .encode_to_vec()
}

/// API snake_case → dispatcher dot-notation aliases, used by
/// `system.run` meta-dispatch.
pub const METHOD_ALIASES: &[(&str, &str)] = &[
    ("door_lock", "door.lock"),
    ("door_unlock", "door.unlock"),
    ("auto_conditioning_start", "climate.on"),
    ("auto_conditioning_stop", "climate.off"),
    ("set_temps", "climate.set_temp"),
    ("set_preconditioning_max", "climate.defrost"),
    ("charge_start", "charge.start"),
    ("charge_stop", "charge.stop"),
    ("set_charge_limit", "charge.set_limit"),
    ("actuate_trunk", "trunk.open"),
    ("flash_lights", "flash_lights"),
    ("honk_horn", "honk_horn"),
    ("share", "nav.send"),
    ("navigation_gps_request", "nav.gps"),
    ("navigation_sc_request", "nav.supercharger"),
    ("navigation_waypoints_request", "nav.waypoints"),
    ("trigger_homelink", "homelink.trigger"),
    ("list_triggers", "trigger.list"),
];

/// Resolve an alias; unknown names pass through unchanged.
#[must_use]
pub fn resolve_alias(name: &str) -> &str {
    METHOD_ALIASES
        .iter()
        .find(|(api, _)| *api == name)
        .map(|(_, dot)| *dot)
        .unwrap_or(name)
}
