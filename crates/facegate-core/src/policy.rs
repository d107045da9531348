//! Security profiles: detector sensitivity plus acceptance threshold.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sensitivity level of a built-in profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileLevel {
    Low,
    Medium,
    High,
}

/// Parameters handed to the face locator for one detection call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    /// Search granularity; always > 1.0. Smaller means a finer, more
    /// sensitive search.
    pub scale_factor: f32,
    /// Overlapping candidates a region needs before it is reported.
    pub min_neighbors: u32,
    /// Smallest reported face, `(width, height)` in pixels.
    pub min_size: (u32, u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub level: ProfileLevel,
    pub name: &'static str,
    pub scale_factor: f32,
    pub min_neighbors: u32,
    pub min_face_size: (u32, u32),
    /// Minimum match confidence (0–100) for a grant.
    pub confidence_threshold: f32,
}

const PROFILES: [Profile; 3] = [
    Profile {
        level: ProfileLevel::Low,
        name: "Baixo",
        scale_factor: 1.2,
        min_neighbors: 3,
        min_face_size: (30, 30),
        confidence_threshold: 60.0,
    },
    Profile {
        level: ProfileLevel::Medium,
        name: "Medio",
        scale_factor: 1.1,
        min_neighbors: 5,
        min_face_size: (40, 40),
        confidence_threshold: 70.0,
    },
    Profile {
        level: ProfileLevel::High,
        name: "Alto",
        scale_factor: 1.05,
        min_neighbors: 7,
        min_face_size: (50, 50),
        confidence_threshold: 80.0,
    },
];

impl ProfileLevel {
    pub const ALL: [ProfileLevel; 3] = [ProfileLevel::Low, ProfileLevel::Medium, ProfileLevel::High];

    pub fn profile(self) -> &'static Profile {
        match self {
            ProfileLevel::Low => &PROFILES[0],
            ProfileLevel::Medium => &PROFILES[1],
            ProfileLevel::High => &PROFILES[2],
        }
    }

    /// Operator key: 1 = Low, 2 = Medium, 3 = High.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(ProfileLevel::Low),
            2 => Some(ProfileLevel::Medium),
            3 => Some(ProfileLevel::High),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            ProfileLevel::Low => 1,
            ProfileLevel::Medium => 2,
            ProfileLevel::High => 3,
        }
    }
}

impl fmt::Display for ProfileLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.profile().name)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown security profile '{0}' (expected 1-3, low/medium/high or baixo/medio/alto)")]
pub struct UnknownProfile(pub String);

impl FromStr for ProfileLevel {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        match key.as_str() {
            "1" | "low" | "baixo" => Ok(ProfileLevel::Low),
            "2" | "medium" | "medio" => Ok(ProfileLevel::Medium),
            "3" | "high" | "alto" => Ok(ProfileLevel::High),
            _ => Err(UnknownProfile(s.trim().to_string())),
        }
    }
}

impl Profile {
    pub fn detection(&self) -> DetectionParams {
        DetectionParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_size: self.min_face_size,
        }
    }

    /// Threshold check; equality grants.
    pub fn accepts(&self, confidence: f32) -> bool {
        confidence >= self.confidence_threshold
    }
}

/// Holds the single active profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPolicy {
    active: ProfileLevel,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::new(ProfileLevel::Medium)
    }
}

impl SecurityPolicy {
    pub fn new(active: ProfileLevel) -> Self {
        Self { active }
    }

    pub fn level(&self) -> ProfileLevel {
        self.active
    }

    pub fn active(&self) -> &'static Profile {
        self.active.profile()
    }

    /// Make `level` the active profile. Returns whether anything changed.
    pub fn switch(&mut self, level: ProfileLevel) -> bool {
        let changed = self.active != level;
        self.active = level;
        changed
    }
}
