//! # Hub Status Codes
//!
//! The closed set of delivery outcomes the hub can report for a request
//! that reached it, mapped from the transport-level response code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status reported by the hub for a request that completed a round-trip.
///
/// Every transport-level response code maps onto exactly one variant;
/// codes outside the known set collapse to [`HubStatusCode::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HubStatusCode {
    /// Request succeeded and the response carries a body.
    Ok,
    /// Request succeeded with nothing to return. Also the only acceptable
    /// answer to a message acknowledgment.
    OkEmpty,
    /// The hub rejected the request body as malformed.
    BadFormat,
    /// The supplied authorization token was missing, expired, or invalid.
    Unauthorized,
    /// The hub has reached its provisioned device quota.
    TooManyDevices,
    /// The hub or the device identity does not exist.
    HubOrDeviceIdNotFound,
    /// A conditional operation failed, typically a stale message lock.
    PreconditionFailed,
    /// The payload exceeds the hub's size limit.
    RequestEntityTooLarge,
    /// The device is being throttled; the request may be retried later.
    Throttled,
    /// The hub failed internally.
    InternalServerError,
    /// The hub is temporarily unable to process requests.
    ServerBusy,
    /// Any response code with no dedicated mapping.
    Error,
}

impl HubStatusCode {
    /// Maps a transport-level response code onto the closed status set.
    pub fn from_transport_status(status: u16) -> Self {
        match status {
            200 => HubStatusCode::Ok,
            204 => HubStatusCode::OkEmpty,
            400 => HubStatusCode::BadFormat,
            401 => HubStatusCode::Unauthorized,
            403 => HubStatusCode::TooManyDevices,
            404 => HubStatusCode::HubOrDeviceIdNotFound,
            412 => HubStatusCode::PreconditionFailed,
            413 => HubStatusCode::RequestEntityTooLarge,
            429 => HubStatusCode::Throttled,
            500 => HubStatusCode::InternalServerError,
            503 => HubStatusCode::ServerBusy,
            _ => HubStatusCode::Error,
        }
    }

    /// True for the two success outcomes.
    pub fn is_success(self) -> bool {
        matches!(self, HubStatusCode::Ok | HubStatusCode::OkEmpty)
    }
}

impl fmt::Display for HubStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HubStatusCode::Ok => "OK",
            HubStatusCode::OkEmpty => "OK_EMPTY",
            HubStatusCode::BadFormat => "BAD_FORMAT",
            HubStatusCode::Unauthorized => "UNAUTHORIZED",
            HubStatusCode::TooManyDevices => "TOO_MANY_DEVICES",
            HubStatusCode::HubOrDeviceIdNotFound => "HUB_OR_DEVICE_ID_NOT_FOUND",
            HubStatusCode::PreconditionFailed => "PRECONDITION_FAILED",
            HubStatusCode::RequestEntityTooLarge => "REQUEST_ENTITY_TOO_LARGE",
            HubStatusCode::Throttled => "THROTTLED",
            HubStatusCode::InternalServerError => "INTERNAL_SERVER_ERROR",
            HubStatusCode::ServerBusy => "SERVER_BUSY",
            HubStatusCode::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}
