use crate::image::Rect;
use crate::lead::LeadId;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Result type alias for digitization operations
pub type Result<T> = std::result::Result<T, DigitizeError>;

/// Part of the input a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// A lead ROI
    Lead(LeadId),
    /// The grid region used for calibration
    Grid,
    /// The full input image
    Image,
    /// A mask handed directly to an extraction strategy
    Mask,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Lead(lead) => write!(f, "lead {}", lead),
            Region::Grid => f.write_str("grid region"),
            Region::Image => f.write_str("input image"),
            Region::Mask => f.write_str("trace mask"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DigitizeError {
    #[error("Crop rectangle {rect} exceeds image bounds {width}x{height}")]
    OutOfBounds { rect: Rect, width: u32, height: u32 },

    #[error("ROI of {region} is outside the image: {rect} exceeds {width}x{height}")]
    InvalidGeometry {
        region: Region,
        rect: Rect,
        width: u32,
        height: u32,
    },

    #[error("No active pixels in {region}")]
    EmptyMask { region: Region },

    #[error("No signal detected in {region}")]
    NoSignalDetected { region: Region },

    #[error("Grid calibration of {region} has low confidence: {confidence:.2} (minimum {minimum:.2})")]
    LowConfidenceCalibration {
        region: Region,
        confidence: f64,
        minimum: f64,
    },

    #[error("Unable to calibrate {region}: {reason}")]
    CalibrationUnavailable { region: Region, reason: String },

    #[error("Invalid parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },

    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

impl DigitizeError {
    pub fn invalid_parameter(parameter: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }

    /// Re-tag the error with the region it occurred in.
    /// A failed crop becomes an `InvalidGeometry` of that region.
    pub fn attributed_to(self, region: Region) -> Self {
        match self {
            Self::OutOfBounds {
                rect,
                width,
                height,
            }
            | Self::InvalidGeometry {
                rect,
                width,
                height,
                ..
            } => Self::InvalidGeometry {
                region,
                rect,
                width,
                height,
            },
            Self::EmptyMask { .. } => Self::EmptyMask { region },
            Self::NoSignalDetected { .. } => Self::NoSignalDetected { region },
            Self::LowConfidenceCalibration {
                confidence,
                minimum,
                ..
            } => Self::LowConfidenceCalibration {
                region,
                confidence,
                minimum,
            },
            Self::CalibrationUnavailable { reason, .. } => {
                Self::CalibrationUnavailable { region, reason }
            }
            other => other,
        }
    }

    /// Region the error is attributed to, if any
    pub fn region(&self) -> Option<Region> {
        match self {
            Self::InvalidGeometry { region, .. }
            | Self::EmptyMask { region }
            | Self::NoSignalDetected { region }
            | Self::LowConfidenceCalibration { region, .. }
            | Self::CalibrationUnavailable { region, .. } => Some(*region),
            Self::OutOfBounds { .. } | Self::InvalidParameter { .. } | Self::InvalidImage(_) => {
                None
            }
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfBounds { .. } => "OUT_OF_BOUNDS",
            Self::InvalidGeometry { .. } => "INVALID_GEOMETRY",
            Self::EmptyMask { .. } => "EMPTY_MASK",
            Self::NoSignalDetected { .. } => "NO_SIGNAL_DETECTED",
            Self::LowConfidenceCalibration { .. } => "LOW_CONFIDENCE_CALIBRATION",
            Self::CalibrationUnavailable { .. } => "CALIBRATION_UNAVAILABLE",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::InvalidImage(_) => "INVALID_IMAGE",
        }
    }
}

/// Serialized as `{ code, region, message }` inside digitization reports
impl Serialize for DigitizeError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DigitizeError", 3)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("region", &self.region())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Errors surfaced by the HTTP layer
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Digitize(#[from] DigitizeError),

    #[error("Unsupported extraction method: {0}")]
    UnsupportedMethod(String),

    #[error("Image too large: {size} bytes (max: {max} bytes)")]
    ImageTooLarge { size: usize, max: usize },

    #[error("Request body too large: {0}")]
    BodyTooLarge(String),

    #[error("Missing file in request")]
    MissingFile,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Digitize(err) => {
                let status = match err {
                    DigitizeError::InvalidImage(_)
                    | DigitizeError::InvalidParameter { .. }
                    | DigitizeError::OutOfBounds { .. }
                    | DigitizeError::InvalidGeometry { .. } => StatusCode::BAD_REQUEST,
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, err.code())
            }
            ApiError::UnsupportedMethod(_) => (StatusCode::BAD_REQUEST, "UNSUPPORTED_METHOD"),
            ApiError::ImageTooLarge { .. } | ApiError::BodyTooLarge(_) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "IMAGE_TOO_LARGE")
            }
            ApiError::MissingFile => (StatusCode::BAD_REQUEST, "MISSING_FILE"),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}
