// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Every configuration table the daemon keeps in sync.

use super::descriptor::{Expansion, Field, FieldKind, ObjectDescriptor};

const fn id(column: &'static str) -> Field {
    Field { column, kind: FieldKind::Id }
}
const fn text(column: &'static str) -> Field {
    Field { column, kind: FieldKind::Text }
}
const fn int(column: &'static str) -> Field {
    Field { column, kind: FieldKind::Int }
}
const fn float(column: &'static str) -> Field {
    Field { column, kind: FieldKind::Float }
}
const fn flag(column: &'static str) -> Field {
    Field { column, kind: FieldKind::Bool }
}
const fn json(column: &'static str) -> Field {
    Field { column, kind: FieldKind::Json }
}

const fn object(family: &'static str, table: &'static str, fields: &'static [Field]) -> ObjectDescriptor {
    ObjectDescriptor {
        family,
        table,
        delta_column: "id",
        checksum: true,
        fields,
        expansion: Expansion::Single,
        null_row: false,
    }
}

/// Immutable link rows: no properties checksum, only inserted or deleted.
const fn relation(family: &'static str, table: &'static str, fields: &'static [Field]) -> ObjectDescriptor {
    ObjectDescriptor {
        checksum: false,
        ..object(family, table, fields)
    }
}

/// Referenced through nullable-by-sentinel foreign keys.
const fn referenced(family: &'static str, table: &'static str, fields: &'static [Field]) -> ObjectDescriptor {
    ObjectDescriptor {
        null_row: true,
        ..object(family, table, fields)
    }
}

// ─── checkables ────────────────────────────────────────────────────────────

const SERVICE: &[Field] = &[
    id("host_id"),
    id("name_checksum"),
    text("name"),
    text("name_ci"),
    text("display_name"),
    text("checkcommand_name"),
    id("checkcommand_id"),
    int("max_check_attempts"),
    text("check_timeperiod_name"),
    id("check_timeperiod_id"),
    int("check_timeout"),
    int("check_interval"),
    int("check_retry_interval"),
    flag("active_checks_enabled"),
    flag("passive_checks_enabled"),
    flag("event_handler_enabled"),
    flag("notifications_enabled"),
    flag("flapping_enabled"),
    float("flapping_threshold_low"),
    float("flapping_threshold_high"),
    flag("perfdata_enabled"),
    text("eventcommand_name"),
    id("eventcommand_id"),
    flag("is_volatile"),
    text("zone_name"),
    id("zone_id"),
    text("command_endpoint_name"),
    id("command_endpoint_id"),
    text("notes"),
    id("notes_url_id"),
    id("action_url_id"),
    id("icon_image_id"),
    text("icon_image_alt"),
];

const HOST: &[Field] = &[
    id("name_checksum"),
    text("name"),
    text("name_ci"),
    text("display_name"),
    text("address"),
    text("address6"),
    text("checkcommand_name"),
    id("checkcommand_id"),
    int("max_check_attempts"),
    text("check_timeperiod_name"),
    id("check_timeperiod_id"),
    int("check_timeout"),
    int("check_interval"),
    int("check_retry_interval"),
    flag("active_checks_enabled"),
    flag("passive_checks_enabled"),
    flag("event_handler_enabled"),
    flag("notifications_enabled"),
    flag("flapping_enabled"),
    float("flapping_threshold_low"),
    float("flapping_threshold_high"),
    flag("perfdata_enabled"),
    text("eventcommand_name"),
    id("eventcommand_id"),
    flag("is_volatile"),
    text("zone_name"),
    id("zone_id"),
    text("command_endpoint_name"),
    id("command_endpoint_id"),
    text("notes"),
    id("notes_url_id"),
    id("action_url_id"),
    id("icon_image_id"),
    text("icon_image_alt"),
];

const GROUP: &[Field] = &[
    id("name_checksum"),
    text("name"),
    text("name_ci"),
    text("display_name"),
    id("zone_id"),
];

const HOST_CUSTOMVAR: &[Field] = &[id("host_id"), id("customvar_id")];
const HOSTGROUP_CUSTOMVAR: &[Field] = &[id("hostgroup_id"), id("customvar_id")];
const HOSTGROUP_MEMBER: &[Field] = &[id("host_id"), id("hostgroup_id")];
const SERVICE_CUSTOMVAR: &[Field] = &[id("service_id"), id("customvar_id")];
const SERVICEGROUP_CUSTOMVAR: &[Field] = &[id("servicegroup_id"), id("customvar_id")];
const SERVICEGROUP_MEMBER: &[Field] = &[id("service_id"), id("servicegroup_id")];

// ─── commands ──────────────────────────────────────────────────────────────

const COMMAND: &[Field] = &[
    id("zone_id"),
    id("name_checksum"),
    text("name"),
    text("name_ci"),
    json("command"),
    int("timeout"),
];

const CHECKCOMMAND_CUSTOMVAR: &[Field] = &[id("checkcommand_id"), id("customvar_id")];
const EVENTCOMMAND_CUSTOMVAR: &[Field] = &[id("eventcommand_id"), id("customvar_id")];
const NOTIFICATIONCOMMAND_CUSTOMVAR: &[Field] = &[id("notificationcommand_id"), id("customvar_id")];

const CHECKCOMMAND_ARG: &[Field] = &[
    id("checkcommand_id"),
    text("argument_key"),
    json("argument_value"),
    int("argument_order"),
    text("description"),
    text("argument_key_override"),
    flag("repeat_key"),
    flag("required"),
    text("set_if"),
    flag("skip_key"),
];
const EVENTCOMMAND_ARG: &[Field] = &[
    id("eventcommand_id"),
    text("argument_key"),
    json("argument_value"),
    int("argument_order"),
    text("description"),
    text("argument_key_override"),
    flag("repeat_key"),
    flag("required"),
    text("set_if"),
    flag("skip_key"),
];
const NOTIFICATIONCOMMAND_ARG: &[Field] = &[
    id("notificationcommand_id"),
    text("argument_key"),
    json("argument_value"),
    int("argument_order"),
    text("description"),
    text("argument_key_override"),
    flag("repeat_key"),
    flag("required"),
    text("set_if"),
    flag("skip_key"),
];
const CHECKCOMMAND_ENV: &[Field] = &[id("checkcommand_id"), text("envvar_key"), json("envvar_value")];
const EVENTCOMMAND_ENV: &[Field] = &[id("eventcommand_id"), text("envvar_key"), json("envvar_value")];
const NOTIFICATIONCOMMAND_ENV: &[Field] = &[
    id("notificationcommand_id"),
    text("envvar_key"),
    json("envvar_value"),
];

// ─── comments, downtimes ───────────────────────────────────────────────────

const COMMENT: &[Field] = &[
    text("object_type"),
    id("host_id"),
    id("service_id"),
    id("name_checksum"),
    text("name"),
    text("author"),
    text("text"),
    text("entry_type"),
    int("entry_time"),
    flag("is_persistent"),
    flag("is_sticky"),
    int("expire_time"),
    id("zone_id"),
];

const DOWNTIME: &[Field] = &[
    id("triggered_by_id"),
    id("parent_id"),
    text("object_type"),
    id("host_id"),
    id("service_id"),
    id("name_checksum"),
    text("name"),
    text("author"),
    text("comment"),
    int("entry_time"),
    int("scheduled_start_time"),
    int("scheduled_end_time"),
    int("scheduled_duration"),
    flag("is_flexible"),
    int("flexible_duration"),
    flag("is_in_effect"),
    int("start_time"),
    int("end_time"),
    int("duration"),
    text("scheduled_by"),
    id("zone_id"),
];

// ─── topology ──────────────────────────────────────────────────────────────

const ENDPOINT: &[Field] = &[id("name_checksum"), text("name"), text("name_ci"), id("zone_id")];

const ZONE: &[Field] = &[
    id("name_checksum"),
    text("name"),
    text("name_ci"),
    flag("is_global"),
    id("parent_id"),
    int("depth"),
];

// ─── notifications ─────────────────────────────────────────────────────────

const NOTIFICATION: &[Field] = &[
    id("name_checksum"),
    text("name"),
    text("name_ci"),
    id("host_id"),
    id("service_id"),
    id("notificationcommand_id"),
    int("times_begin"),
    int("times_end"),
    int("notification_interval"),
    id("timeperiod_id"),
    Field { column: "states", kind: FieldKind::States },
    Field { column: "types", kind: FieldKind::Types },
    id("zone_id"),
];

const NOTIFICATION_USER: &[Field] = &[id("notification_id"), id("user_id")];
const NOTIFICATION_USERGROUP: &[Field] = &[id("notification_id"), id("usergroup_id")];
const NOTIFICATION_RECIPIENT: &[Field] = &[id("notification_id"), id("user_id"), id("usergroup_id")];
const NOTIFICATION_CUSTOMVAR: &[Field] = &[id("notification_id"), id("customvar_id")];

// ─── time periods ──────────────────────────────────────────────────────────

const TIMEPERIOD: &[Field] = &[
    id("name_checksum"),
    text("name"),
    text("name_ci"),
    text("display_name"),
    flag("prefer_includes"),
    id("zone_id"),
];

const TIMEPERIOD_RANGE: &[Field] = &[id("timeperiod_id"), text("range_key"), text("range_value")];
const TIMEPERIOD_OVERRIDE_INCLUDE: &[Field] = &[id("timeperiod_id"), id("override_id")];
const TIMEPERIOD_OVERRIDE_EXCLUDE: &[Field] = &[id("timeperiod_id"), id("override_id")];
const TIMEPERIOD_CUSTOMVAR: &[Field] = &[id("timeperiod_id"), id("customvar_id")];

// ─── users ─────────────────────────────────────────────────────────────────

const USER: &[Field] = &[
    id("name_checksum"),
    text("name"),
    text("name_ci"),
    text("display_name"),
    text("email"),
    text("pager"),
    flag("notifications_enabled"),
    id("timeperiod_id"),
    Field { column: "states", kind: FieldKind::States },
    Field { column: "types", kind: FieldKind::Types },
    id("zone_id"),
];

const USER_CUSTOMVAR: &[Field] = &[id("user_id"), id("customvar_id")];
const USERGROUP_MEMBER: &[Field] = &[id("user_id"), id("usergroup_id")];
const USERGROUP_CUSTOMVAR: &[Field] = &[id("usergroup_id"), id("customvar_id")];

// ─── custom variables, urls, icons ─────────────────────────────────────────

const CUSTOMVAR: &[Field] = &[id("name_checksum"), text("name"), json("value")];

const URL: &[Field] = &[text("url")];
const ICON_IMAGE: &[Field] = &[text("icon_image")];

/// All descriptors, in dependency-friendly order.
pub static CATALOG: &[ObjectDescriptor] = &[
    referenced("endpoint", "endpoint", ENDPOINT),
    referenced("zone", "zone", ZONE),
    referenced("action:url", "action_url", URL),
    referenced("notes:url", "notes_url", URL),
    referenced("icon:image", "icon_image", ICON_IMAGE),
    object("customvar", "customvar", CUSTOMVAR),
    ObjectDescriptor {
        family: "customvar",
        table: "customvar_flat",
        delta_column: "customvar_id",
        checksum: false,
        fields: &[],
        expansion: Expansion::FlatCustomvar,
        null_row: false,
    },
    referenced("timeperiod", "timeperiod", TIMEPERIOD),
    relation("timeperiod:range", "timeperiod_range", TIMEPERIOD_RANGE),
    relation("timeperiod:override:include", "timeperiod_override_include", TIMEPERIOD_OVERRIDE_INCLUDE),
    relation("timeperiod:override:exclude", "timeperiod_override_exclude", TIMEPERIOD_OVERRIDE_EXCLUDE),
    relation("timeperiod:customvar", "timeperiod_customvar", TIMEPERIOD_CUSTOMVAR),
    referenced("checkcommand", "checkcommand", COMMAND),
    object("checkcommand:argument", "checkcommand_argument", CHECKCOMMAND_ARG),
    object("checkcommand:envvar", "checkcommand_envvar", CHECKCOMMAND_ENV),
    relation("checkcommand:customvar", "checkcommand_customvar", CHECKCOMMAND_CUSTOMVAR),
    referenced("eventcommand", "eventcommand", COMMAND),
    object("eventcommand:argument", "eventcommand_argument", EVENTCOMMAND_ARG),
    object("eventcommand:envvar", "eventcommand_envvar", EVENTCOMMAND_ENV),
    relation("eventcommand:customvar", "eventcommand_customvar", EVENTCOMMAND_CUSTOMVAR),
    referenced("notificationcommand", "notificationcommand", COMMAND),
    object("notificationcommand:argument", "notificationcommand_argument", NOTIFICATIONCOMMAND_ARG),
    object("notificationcommand:envvar", "notificationcommand_envvar", NOTIFICATIONCOMMAND_ENV),
    relation("notificationcommand:customvar", "notificationcommand_customvar", NOTIFICATIONCOMMAND_CUSTOMVAR),
    object("host", "host", HOST),
    relation("host:customvar", "host_customvar", HOST_CUSTOMVAR),
    object("hostgroup", "hostgroup", GROUP),
    relation("hostgroup:customvar", "hostgroup_customvar", HOSTGROUP_CUSTOMVAR),
    relation("host:groupmember", "hostgroup_member", HOSTGROUP_MEMBER),
    object("service", "service", SERVICE),
    relation("service:customvar", "service_customvar", SERVICE_CUSTOMVAR),
    object("servicegroup", "servicegroup", GROUP),
    relation("servicegroup:customvar", "servicegroup_customvar", SERVICEGROUP_CUSTOMVAR),
    relation("service:groupmember", "servicegroup_member", SERVICEGROUP_MEMBER),
    object("user", "user", USER),
    relation("user:customvar", "user_customvar", USER_CUSTOMVAR),
    object("usergroup", "usergroup", GROUP),
    relation("usergroup:customvar", "usergroup_customvar", USERGROUP_CUSTOMVAR),
    relation("user:groupmember", "usergroup_member", USERGROUP_MEMBER),
    object("notification", "notification", NOTIFICATION),
    relation("notification:user", "notification_user", NOTIFICATION_USER),
    relation("notification:usergroup", "notification_usergroup", NOTIFICATION_USERGROUP),
    relation("notification:recipient", "notification_recipient", NOTIFICATION_RECIPIENT),
    relation("notification:customvar", "notification_customvar", NOTIFICATION_CUSTOMVAR),
    object("comment", "comment", COMMENT),
    object("downtime", "downtime", DOWNTIME),
];

/// Look up a descriptor by table name.
#[must_use]
pub fn find(table: &str) -> Option<&'static ObjectDescriptor> {
    CATALOG.iter().find(|d| d.table == table)
}

/// All descriptors reading `icinga:config:<family>`.
pub fn by_family(family: &str) -> impl Iterator<Item = &'static ObjectDescriptor> + '_ {
    CATALOG.iter().filter(move |d| d.family == family)
}
