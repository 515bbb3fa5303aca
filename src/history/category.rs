// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! History categories and their table layouts.

use std::fmt;

/// Checkable kind a history stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Host,
    Service,
}

impl ObjectKind {
    pub const ALL: [Self; 2] = [Self::Host, Self::Service];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Service => "service",
        }
    }

    /// The generic `<object_type>_history` index table.
    #[must_use]
    pub fn index_table(self) -> &'static str {
        match self {
            Self::Host => "host_history",
            Self::Service => "service_history",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    State,
    Notification,
    Downtime,
    Comment,
    Flapping,
    Acknowledgement,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a category row is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// 16-byte UUID minted per event.
    Uuid,
    /// 20-byte id of the object the history follows.
    Binary,
}

/// Column type of a history field. Stream values are always strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Uuid,
    Id,
    Text,
    /// Text cut to the column limit.
    LongText(usize),
    Int,
    Bool,
    /// Notification type name or bit.
    TypeBit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryField {
    pub column: &'static str,
    pub field: &'static str,
    pub kind: Kind,
}

const fn f(column: &'static str, kind: Kind) -> HistoryField {
    HistoryField { column, field: column, kind }
}

/// Fields every category carries, written to both tables.
pub const COMMON: &[HistoryField] = &[
    f("endpoint_id", Kind::Id),
    f("object_type", Kind::Text),
    f("host_id", Kind::Id),
    f("service_id", Kind::Id),
];

const STATE: &[HistoryField] = &[
    f("event_time", Kind::Int),
    f("state_type", Kind::Int),
    f("soft_state", Kind::Int),
    f("hard_state", Kind::Int),
    f("previous_soft_state", Kind::Int),
    f("previous_hard_state", Kind::Int),
    HistoryField { column: "attempt", field: "check_attempt", kind: Kind::Int },
    f("output", Kind::LongText(4096)),
    f("long_output", Kind::LongText(65535)),
    f("max_check_attempts", Kind::Int),
    f("check_source", Kind::Text),
];

const NOTIFICATION: &[HistoryField] = &[
    f("notification_id", Kind::Id),
    f("type", Kind::TypeBit),
    f("send_time", Kind::Int),
    f("state", Kind::Int),
    f("previous_hard_state", Kind::Int),
    f("author", Kind::Text),
    f("text", Kind::LongText(4096)),
    f("users_notified", Kind::Int),
];

const DOWNTIME: &[HistoryField] = &[
    f("triggered_by_id", Kind::Id),
    f("entry_time", Kind::Int),
    f("author", Kind::Text),
    f("comment", Kind::LongText(4096)),
    f("is_flexible", Kind::Bool),
    f("flexible_duration", Kind::Int),
    f("scheduled_start_time", Kind::Int),
    f("scheduled_end_time", Kind::Int),
    f("start_time", Kind::Int),
    f("end_time", Kind::Int),
    f("has_been_cancelled", Kind::Bool),
    f("trigger_time", Kind::Int),
    f("cancel_time", Kind::Int),
];

const COMMENT: &[HistoryField] = &[
    f("entry_time", Kind::Int),
    f("author", Kind::Text),
    f("comment", Kind::LongText(4096)),
    f("entry_type", Kind::Text),
    f("is_persistent", Kind::Bool),
    f("is_sticky", Kind::Bool),
    f("expire_time", Kind::Int),
    f("remove_time", Kind::Int),
    f("has_been_removed", Kind::Bool),
    f("removed_by", Kind::Text),
];

const FLAPPING: &[HistoryField] = &[
    f("start_time", Kind::Int),
    f("end_time", Kind::Int),
    f("percent_state_change_start", Kind::Text),
    f("percent_state_change_end", Kind::Text),
    f("flapping_threshold_low", Kind::Text),
    f("flapping_threshold_high", Kind::Text),
];

const ACKNOWLEDGEMENT: &[HistoryField] = &[
    f("set_time", Kind::Int),
    f("clear_time", Kind::Int),
    f("author", Kind::Text),
    f("comment", Kind::LongText(4096)),
    f("expire_time", Kind::Int),
    f("is_sticky", Kind::Bool),
    f("is_persistent", Kind::Bool),
    f("cleared_by", Kind::Text),
];

impl Category {
    pub const ALL: [Self; 6] = [
        Self::State,
        Self::Notification,
        Self::Downtime,
        Self::Comment,
        Self::Flapping,
        Self::Acknowledgement,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Notification => "notification",
            Self::Downtime => "downtime",
            Self::Comment => "comment",
            Self::Flapping => "flapping",
            Self::Acknowledgement => "acknowledgement",
        }
    }

    #[must_use]
    pub fn stream(self, object: ObjectKind) -> String {
        format!("icinga:history:stream:{}:{}", object.as_str(), self.as_str())
    }

    /// The `<object_type>_<category>_history` table.
    #[must_use]
    pub fn table(self, object: ObjectKind) -> &'static str {
        use Category::*;
        use ObjectKind::*;
        match (object, self) {
            (Host, State) => "host_state_history",
            (Host, Notification) => "host_notification_history",
            (Host, Downtime) => "host_downtime_history",
            (Host, Comment) => "host_comment_history",
            (Host, Flapping) => "host_flapping_history",
            (Host, Acknowledgement) => "host_acknowledgement_history",
            (Service, State) => "service_state_history",
            (Service, Notification) => "service_notification_history",
            (Service, Downtime) => "service_downtime_history",
            (Service, Comment) => "service_comment_history",
            (Service, Flapping) => "service_flapping_history",
            (Service, Acknowledgement) => "service_acknowledgement_history",
        }
    }

    /// Primary key column of the category table and the stream field it
    /// is read from.
    #[must_use]
    pub fn id_column(self) -> &'static str {
        match self {
            Self::Downtime => "downtime_id",
            Self::Comment => "comment_id",
            _ => "id",
        }
    }

    #[must_use]
    pub fn id_kind(self) -> IdKind {
        match self {
            Self::State | Self::Notification => IdKind::Uuid,
            _ => IdKind::Binary,
        }
    }

    /// Foreign-key column in the index table.
    #[must_use]
    pub fn index_column(self) -> &'static str {
        match self {
            Self::State => "state_history_id",
            Self::Notification => "notification_history_id",
            Self::Downtime => "downtime_history_id",
            Self::Comment => "comment_history_id",
            Self::Flapping => "flapping_history_id",
            Self::Acknowledgement => "acknowledgement_history_id",
        }
    }

    /// Field used as the index row's `event_time` when the event has none.
    #[must_use]
    pub fn time_field(self) -> &'static str {
        match self {
            Self::State => "event_time",
            Self::Notification => "send_time",
            Self::Downtime | Self::Flapping => "start_time",
            Self::Comment => "entry_time",
            Self::Acknowledgement => "set_time",
        }
    }

    #[must_use]
    pub fn fields(self) -> &'static [HistoryField] {
        match self {
            Self::State => STATE,
            Self::Notification => NOTIFICATION,
            Self::Downtime => DOWNTIME,
            Self::Comment => COMMENT,
            Self::Flapping => FLAPPING,
            Self::Acknowledgement => ACKNOWLEDGEMENT,
        }
    }

    /// Columns of the category table in statement order.
    #[must_use]
    pub fn columns(self) -> Vec<&'static str> {
        let mut columns = vec![self.id_column(), "environment_id"];
        columns.extend(COMMON.iter().map(|f| f.column));
        columns.extend(self.fields().iter().map(|f| f.column));
        columns
    }

    /// Retention predicate columns: rows go once the time column and, if
    /// present, the end column are both past the threshold.
    #[must_use]
    pub fn retention_columns(self) -> (&'static str, Option<&'static str>) {
        match self {
            Self::State => ("event_time", None),
            Self::Notification => ("send_time", None),
            Self::Downtime | Self::Flapping => ("start_time", Some("end_time")),
            Self::Comment => ("entry_time", Some("remove_time")),
            Self::Acknowledgement => ("set_time", Some("clear_time")),
        }
    }

    /// Zero sentinel for this category's index column.
    #[must_use]
    pub fn zero_id(self) -> Vec<u8> {
        match self.id_kind() {
            IdKind::Uuid => vec![0; 16],
            IdKind::Binary => vec![0; 20],
        }
    }
}

/// Columns of the `<object_type>_history` index table.
pub const INDEX_COLUMNS: &[&str] = &[
    "id",
    "environment_id",
    "endpoint_id",
    "object_type",
    "host_id",
    "service_id",
    "notification_history_id",
    "state_history_id",
    "downtime_history_id",
    "comment_history_id",
    "flapping_history_id",
    "acknowledgement_history_id",
    "event_type",
    "event_time",
];

pub const SLA_STATE_TABLE: &str = "sla_history_state";
pub const SLA_STATE_COLUMNS: &[&str] = &[
    "id",
    "environment_id",
    "endpoint_id",
    "object_type",
    "host_id",
    "service_id",
    "event_time",
    "hard_state",
    "previous_hard_state",
];

pub const SLA_DOWNTIME_TABLE: &str = "sla_history_downtime";
pub const SLA_DOWNTIME_COLUMNS: &[&str] = &[
    "downtime_id",
    "environment_id",
    "endpoint_id",
    "object_type",
    "host_id",
    "service_id",
    "downtime_start",
    "downtime_end",
];
