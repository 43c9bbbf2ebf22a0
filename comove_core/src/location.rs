//! Raw geolocation fixes.

/// A single location fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    /// Unix timestamp, seconds.
    pub timestamp: i64,
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
    pub uncertainty: f64,
    pub speed: f64,
    /// Heading in degrees.
    pub heading: f64,
    /// Vertical speed.
    pub vspeed: f64,
}

/// All fixes of a single device.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationDevice {
    /// Unique device identifier.
    pub name: String,
    /// Sorted by timestamp, ascending.
    pub data: Vec<LocationFix>,
}

impl LocationDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Vec::new(),
        }
    }
}

/// A series of location fixes for every device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationData {
    pub devices: Vec<LocationDevice>,
}
