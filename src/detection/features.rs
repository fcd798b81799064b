//! # Feature Extractor
//!
//! Turns a single `LoginEvent` into the fixed-size numeric vector the anomaly
//! model was trained on:
//!
//! ```text
//! [hour, is_night, login_failed, device_enc, location_enc]
//! ```
//!
//! Extraction is pure and total. Unrecognized device or location labels map
//! to a designated fallback code instead of failing, so any structurally
//! valid event can be scored on its own.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::LoginEvent;

/// Number of model inputs.
pub const FEATURE_COUNT: usize = 5;

/// Hours strictly before this are night.
const NIGHT_ENDS_AT: u32 = 6;

/// Hours strictly after this are night.
const NIGHT_STARTS_AFTER: u32 = 22;

/// Device categories known to the model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    Web,
    Mobile,
    Tablet,
    Unknown,
}

impl DeviceCategory {
    /// Fallback code for unrecognized devices; shares `web`'s slot, as in the
    /// training data.
    pub const UNKNOWN_CODE: u8 = 0;

    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if label.eq_ignore_ascii_case("web") {
            DeviceCategory::Web
        } else if label.eq_ignore_ascii_case("mobile") {
            DeviceCategory::Mobile
        } else if label.eq_ignore_ascii_case("tablet") {
            DeviceCategory::Tablet
        } else {
            DeviceCategory::Unknown
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            DeviceCategory::Web => 0,
            DeviceCategory::Mobile => 1,
            DeviceCategory::Tablet => 2,
            DeviceCategory::Unknown => Self::UNKNOWN_CODE,
        }
    }
}

/// Location categories known to the model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LocationCategory {
    Unknown,
    US,
    UK,
    CA,
}

impl LocationCategory {
    pub const UNKNOWN_CODE: u8 = 0;

    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if label.eq_ignore_ascii_case("us") {
            LocationCategory::US
        } else if label.eq_ignore_ascii_case("uk") {
            LocationCategory::UK
        } else if label.eq_ignore_ascii_case("ca") {
            LocationCategory::CA
        } else {
            LocationCategory::Unknown
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            LocationCategory::Unknown => Self::UNKNOWN_CODE,
            LocationCategory::US => 1,
            LocationCategory::UK => 2,
            LocationCategory::CA => 3,
        }
    }
}

/// Derived, per-event model input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureVector {
    /// Hour of day, 0-23, in the event's own offset.
    pub hour: u32,

    pub is_night: bool,

    pub login_failed: bool,

    pub device: DeviceCategory,

    pub location: LocationCategory,
}

impl FeatureVector {
    /// Numeric layout fed to the model.
    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.hour as f64,
            flag(self.is_night),
            flag(self.login_failed),
            self.device.code() as f64,
            self.location.code() as f64,
        ]
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Whether an hour of day counts as night.
pub fn is_night_hour(hour: u32) -> bool {
    hour < NIGHT_ENDS_AT || hour > NIGHT_STARTS_AFTER
}

/// Extract the feature vector for one event.
pub fn extract(event: &LoginEvent) -> FeatureVector {
    let hour = event.timestamp.hour();
    FeatureVector {
        hour,
        is_night: is_night_hour(hour),
        login_failed: event.outcome.is_failure(),
        device: DeviceCategory::from_label(&event.device),
        location: LocationCategory::from_label(&event.location),
    }
}
