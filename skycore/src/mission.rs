//! Survey mission requests.
//!
//! The console only validates and serializes the operator-drawn polygon and
//! flight parameters; the sweep path itself is planned on the vehicle.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MISSION_PREFIX: &str = "START_SURVEILLANCE:";
pub const MIN_VERTICES: usize = 3;

pub const SPEED_RANGE: (f64, f64) = (1.0, 15.0);
pub const ALTITUDE_RANGE: (f64, f64) = (10.0, 120.0);
pub const LINE_SPACING_RANGE: (f64, f64) = (5.0, 50.0);
pub const BUFFER_ZONE_RANGE: (f64, f64) = (0.0, 20.0);

#[derive(Debug, Error, PartialEq)]
pub enum MissionError {
    #[error("survey area needs at least {MIN_VERTICES} vertices, has {0}")]
    TooFewVertices(usize),
    #[error("survey area is finalized")]
    Finalized,
    #[error("survey area is not finalized")]
    NotFinalized,
    #[error("{name} {value} outside {min}..={max}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("invalid vertex coordinate ({lat}, {lon})")]
    InvalidVertex { lat: f64, lon: f64 },
    #[error("unknown sweep style: {0}")]
    UnknownStyle(String),
    #[error("malformed mission message: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Which polygon side the sweep lines are aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepStyle {
    #[default]
    Longest,
    Shortest,
}

impl SweepStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            SweepStyle::Longest => "longest",
            SweepStyle::Shortest => "shortest",
        }
    }
}

impl FromStr for SweepStyle {
    type Err = MissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "longest" => Ok(SweepStyle::Longest),
            "shortest" => Ok(SweepStyle::Shortest),
            other => Err(MissionError::UnknownStyle(other.to_string())),
        }
    }
}

/// An operator-drawn polygon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurveyArea {
    vertices: Vec<LatLon>,
    finalized: bool,
}

impl SurveyArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertices(&self) -> &[LatLon] {
        &self.vertices
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn push(&mut self, vertex: LatLon) -> Result<(), MissionError> {
        if self.finalized {
            return Err(MissionError::Finalized);
        }
        if !vertex.is_valid() {
            return Err(MissionError::InvalidVertex {
                lat: vertex.lat,
                lon: vertex.lon,
            });
        }
        self.vertices.push(vertex);
        Ok(())
    }

    /// Closes the polygon. A finalized area can no longer change.
    pub fn finalize(&mut self) -> Result<(), MissionError> {
        if self.vertices.len() < MIN_VERTICES {
            return Err(MissionError::TooFewVertices(self.vertices.len()));
        }
        self.finalized = true;
        Ok(())
    }

    /// Clears the polygon, including the finalized flag.
    pub fn reset(&mut self) {
        self.vertices.clear();
        self.finalized = false;
    }
}

/// Flight parameters for a survey.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissionParams {
    pub speed: f64,
    pub altitude: f64,
    pub style: SweepStyle,
    pub line_spacing: f64,
    pub buffer_zone: f64,
}

impl Default for MissionParams {
    fn default() -> Self {
        Self {
            speed: 5.0,
            altitude: 30.0,
            style: SweepStyle::Longest,
            line_spacing: 20.0,
            buffer_zone: 5.0,
        }
    }
}

impl MissionParams {
    pub fn validate(&self) -> Result<(), MissionError> {
        check("speed", self.speed, SPEED_RANGE)?;
        check("altitude", self.altitude, ALTITUDE_RANGE)?;
        check("line spacing", self.line_spacing, LINE_SPACING_RANGE)?;
        check("buffer zone", self.buffer_zone, BUFFER_ZONE_RANGE)?;
        Ok(())
    }
}

fn check(name: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), MissionError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(MissionError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

/// A validated survey request, ready for the data channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionRequest {
    pub vertices: Vec<LatLon>,
    pub params: MissionParams,
}

impl MissionRequest {
    /// Builds a request from a finalized area and validated parameters.
    pub fn new(area: &SurveyArea, params: MissionParams) -> Result<Self, MissionError> {
        if !area.is_finalized() {
            return Err(MissionError::NotFinalized);
        }
        params.validate()?;
        Ok(Self {
            vertices: area.vertices().to_vec(),
            params,
        })
    }
}

/// Validates and serializes a mission into one data-channel message.
pub fn encode(area: &SurveyArea, params: MissionParams) -> Result<String, MissionError> {
    Ok(MissionRequest::new(area, params)?.to_string())
}

impl fmt::Display for MissionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MISSION_PREFIX)?;
        for (i, v) in self.vertices.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", v.lat, v.lon)?;
        }
        let p = &self.params;
        write!(
            f,
            "|{}:{}:{}:{}:{}",
            p.speed,
            p.altitude,
            p.style.as_str(),
            p.line_spacing,
            p.buffer_zone
        )
    }
}

impl FromStr for MissionRequest {
    type Err = MissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(MISSION_PREFIX)
            .ok_or_else(|| MissionError::Malformed("missing prefix".to_string()))?;
        let (points, params) = body
            .split_once('|')
            .ok_or_else(|| MissionError::Malformed("missing parameter section".to_string()))?;

        let mut area = SurveyArea::new();
        for point in points.split(',') {
            let (lat, lon) = point
                .split_once(':')
                .ok_or_else(|| MissionError::Malformed(format!("bad point {point:?}")))?;
            area.push(LatLon::new(number(lat)?, number(lon)?))?;
        }
        area.finalize()?;

        let fields: Vec<&str> = params.split(':').collect();
        let [speed, altitude, style, line_spacing, buffer_zone] = fields.as_slice() else {
            return Err(MissionError::Malformed(format!(
                "expected 5 parameters, got {}",
                fields.len()
            )));
        };
        let params = MissionParams {
            speed: number(speed)?,
            altitude: number(altitude)?,
            style: style.parse()?,
            line_spacing: number(line_spacing)?,
            buffer_zone: number(buffer_zone)?,
        };
        MissionRequest::new(&area, params)
    }
}

fn number(s: &str) -> Result<f64, MissionError> {
    s.parse::<f64>()
        .map_err(|_| MissionError::Malformed(format!("bad number {s:?}")))
}
