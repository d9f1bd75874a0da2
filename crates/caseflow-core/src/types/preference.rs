//! Per-user delivery preferences, read-only to the engine.

use std::collections::BTreeMap;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::notification::{Channel, NotificationType};
use crate::error::{CaseflowError, Result};

/// How often a user wants to receive notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    RealTime,
    Hourly,
    Daily,
    Weekly,
}

/// A daily window during which dispatch is deferred, possibly wrapping midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    #[serde(default)]
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            enabled: true,
            start,
            end,
        }
    }

    /// Whether `t` falls in `[start, end)`, wrapping midnight when start > end.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if !self.enabled {
            return false;
        }
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Global per-channel switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelToggles {
    #[serde(default = "bool_true")]
    pub email: bool,
    #[serde(default)]
    pub sms: bool,
    #[serde(default = "bool_true")]
    pub push: bool,
    #[serde(default = "bool_true")]
    pub in_app: bool,
}

fn bool_true() -> bool {
    true
}

impl Default for ChannelToggles {
    fn default() -> Self {
        Self {
            email: true,
            sms: false,
            push: true,
            in_app: true,
        }
    }
}

impl ChannelToggles {
    pub fn is_on(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email,
            Channel::Sms => self.sms,
            Channel::Push => self.push,
            Channel::InApp => self.in_app,
        }
    }
}

const CHANNELS: usize = Channel::ALL.len();
const TYPES: usize = NotificationType::ALL.len();

type MatrixMap = BTreeMap<NotificationType, BTreeMap<Channel, bool>>;

/// Fixed `NotificationType × Channel → bool` lookup.
///
/// Serialized as a nested map; entries missing from the map keep their default (on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "MatrixMap", into = "MatrixMap")]
pub struct ChannelMatrix {
    cells: [[bool; CHANNELS]; TYPES],
}

impl Default for ChannelMatrix {
    fn default() -> Self {
        Self {
            cells: [[true; CHANNELS]; TYPES],
        }
    }
}

impl ChannelMatrix {
    /// A matrix with every cell off.
    pub fn none() -> Self {
        Self {
            cells: [[false; CHANNELS]; TYPES],
        }
    }

    pub fn get(&self, notification_type: NotificationType, channel: Channel) -> bool {
        self.cells[notification_type.index()][channel.index()]
    }

    pub fn set(&mut self, notification_type: NotificationType, channel: Channel, enabled: bool) {
        self.cells[notification_type.index()][channel.index()] = enabled;
    }

    pub fn with(
        mut self,
        notification_type: NotificationType,
        channel: Channel,
        enabled: bool,
    ) -> Self {
        self.set(notification_type, channel, enabled);
        self
    }
}

impl From<MatrixMap> for ChannelMatrix {
    fn from(map: MatrixMap) -> Self {
        let mut matrix = ChannelMatrix::default();
        for (notification_type, row) in map {
            for (channel, enabled) in row {
                matrix.set(notification_type, channel, enabled);
            }
        }
        matrix
    }
}

impl From<ChannelMatrix> for MatrixMap {
    fn from(matrix: ChannelMatrix) -> Self {
        NotificationType::ALL
            .iter()
            .map(|t| {
                let row = Channel::ALL.iter().map(|c| (*c, matrix.get(*t, *c))).collect();
                (*t, row)
            })
            .collect()
    }
}

/// A user's delivery preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPreference {
    pub user_id: String,
    #[serde(default)]
    pub matrix: ChannelMatrix,
    #[serde(default)]
    pub toggles: ChannelToggles,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub quiet_hours: QuietHours,
    /// Offset of the user's local clock from UTC, used for quiet hours and batch windows.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl ChannelPreference {
    /// Real-time delivery on every globally enabled channel.
    pub fn default_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            matrix: ChannelMatrix::default(),
            toggles: ChannelToggles::default(),
            frequency: Frequency::RealTime,
            quiet_hours: QuietHours::default(),
            utc_offset_minutes: 0,
        }
    }

    /// Validate at settings-write time.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(CaseflowError::Configuration("preference without user_id".into()));
        }
        if self.quiet_hours.enabled && self.quiet_hours.start == self.quiet_hours.end {
            return Err(CaseflowError::Configuration(format!(
                "user {}: quiet hours start and end are both {}",
                self.user_id, self.quiet_hours.start
            )));
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(CaseflowError::Configuration(format!(
                "user {}: utc offset {} minutes out of range",
                self.user_id, self.utc_offset_minutes
            )));
        }
        Ok(())
    }

    /// Channels enabled both globally and in the matrix for this notification type.
    pub fn enabled_channels(&self, notification_type: NotificationType) -> Vec<Channel> {
        Channel::ALL
            .iter()
            .copied()
            .filter(|c| self.toggles.is_on(*c) && self.matrix.get(notification_type, *c))
            .collect()
    }
}
