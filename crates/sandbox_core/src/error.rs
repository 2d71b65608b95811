//! Configuration errors.
//!
//! Invalid parameters are rejected when an object is built, so integration
//! never divides by a zero mass or normalizes by a zero rest length.
//! Transient numerical trouble (NaN positions, degenerate springs) is not an
//! error: it is handled inside the step and reported through
//! [`PhysicsObserver::on_fault`](crate::observer::PhysicsObserver::on_fault).

/// Errors that can occur while building or reconfiguring simulation objects.
#[derive(Debug)]
pub enum ConfigError {
    /// Mass must be finite and strictly positive.
    NonPositiveMass { what: &'static str, value: f32 },
    /// A length (rest length, spacing, size, radius) must be finite and positive.
    NonPositiveLength { what: &'static str, value: f32 },
    /// A coefficient expected in [0, 1] was outside that range.
    CoefficientOutOfRange { what: &'static str, value: f32 },
    /// A value that must be finite and non-negative was not.
    Negative { what: &'static str, value: f32 },
    /// Grid dimensions too small to build the requested lattice.
    InvalidGrid { what: &'static str, width: usize, height: usize },
    /// An id did not refer to a live object in the world.
    UnknownId { what: &'static str, index: usize },
    /// File system error while loading a config file.
    Io(std::io::Error),
    /// JSON parse error while loading a config file.
    Json(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NonPositiveMass { what, value } => {
                write!(f, "{} mass must be positive, got {}", what, value)
            }
            ConfigError::NonPositiveLength { what, value } => {
                write!(f, "{} must be positive, got {}", what, value)
            }
            ConfigError::CoefficientOutOfRange { what, value } => {
                write!(f, "{} must be within [0, 1], got {}", what, value)
            }
            ConfigError::Negative { what, value } => {
                write!(f, "{} must be non-negative, got {}", what, value)
            }
            ConfigError::InvalidGrid {
                what,
                width,
                height,
            } => write!(f, "{} grid {}x{} is too small", what, width, height),
            ConfigError::UnknownId { what, index } => {
                write!(f, "no {} with id {}", what, index)
            }
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e.to_string())
    }
}

/// Result type for configuration and construction.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Reject non-finite or non-positive masses.
pub(crate) fn check_mass(what: &'static str, value: f32) -> ConfigResult<f32> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::NonPositiveMass { what, value })
    }
}

/// Reject non-finite or non-positive lengths.
pub(crate) fn check_length(what: &'static str, value: f32) -> ConfigResult<f32> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::NonPositiveLength { what, value })
    }
}

/// Reject coefficients outside [0, 1].
pub(crate) fn check_unit(what: &'static str, value: f32) -> ConfigResult<f32> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::CoefficientOutOfRange { what, value })
    }
}

/// Reject negative or non-finite values (stiffness, damping, drag).
pub(crate) fn check_non_negative(what: &'static str, value: f32) -> ConfigResult<f32> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::Negative { what, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checks_reject_bad_values() {
        assert!(check_mass("body", 0.0).is_err());
        assert!(check_mass("body", -1.0).is_err());
        assert!(check_mass("body", f32::NAN).is_err());
        assert!(check_mass("body", 2.0).is_ok());

        assert!(check_length("rest length", 0.0).is_err());
        assert!(check_length("rest length", f32::INFINITY).is_err());

        assert!(check_unit("bounciness", 1.2).is_err());
        assert!(check_unit("bounciness", 1.0).is_ok());

        assert!(check_non_negative("damping", -0.1).is_err());
        assert!(check_non_negative("damping", 0.0).is_ok());
    }

    #[test]
    fn test_display_names_the_field() {
        let err = check_mass("piece", -2.0).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("piece"), "message should name the field: {}", msg);
        assert!(msg.contains("-2"), "message should carry the value: {}", msg);
    }
}
