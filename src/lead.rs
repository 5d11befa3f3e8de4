//! Lead identifiers and their location on the scanned page.

use crate::error::DigitizeError;
use crate::image::Rect;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The twelve standard ECG leads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LeadId {
    I,
    II,
    III,
    #[serde(rename = "aVR")]
    AVR,
    #[serde(rename = "aVL")]
    AVL,
    #[serde(rename = "aVF")]
    AVF,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
}

impl LeadId {
    pub const ALL: [LeadId; 12] = [
        LeadId::I,
        LeadId::II,
        LeadId::III,
        LeadId::AVR,
        LeadId::AVL,
        LeadId::AVF,
        LeadId::V1,
        LeadId::V2,
        LeadId::V3,
        LeadId::V4,
        LeadId::V5,
        LeadId::V6,
    ];

    /// Get the conventional lead label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::I => "I",
            Self::II => "II",
            Self::III => "III",
            Self::AVR => "aVR",
            Self::AVL => "aVL",
            Self::AVF => "aVF",
            Self::V1 => "V1",
            Self::V2 => "V2",
            Self::V3 => "V3",
            Self::V4 => "V4",
            Self::V5 => "V5",
            Self::V6 => "V6",
        }
    }
}

/// Parses the conventional, case-sensitive lead label ("I", "aVR", "V1", ...)
impl FromStr for LeadId {
    type Err = DigitizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|lead| lead.as_str() == s)
            .ok_or_else(|| DigitizeError::invalid_parameter("lead", s))
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Region of interest selected for one lead
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeadGeometry {
    pub lead: LeadId,
    pub roi: Rect,
    /// Time of the first column of the ROI, in seconds
    #[serde(default)]
    pub start_time: f64,
}

impl LeadGeometry {
    pub fn new(lead: LeadId, roi: Rect) -> Self {
        Self {
            lead,
            roi,
            start_time: 0.0,
        }
    }

    pub fn with_start_time(mut self, seconds: f64) -> Self {
        self.start_time = seconds;
        self
    }
}
