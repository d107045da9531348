//! facegate-core — face-based access control engine.
//!
//! Enrollment, template matching, security profiles, the access control
//! loop and its audit log. Frames come in through [`FrameSource`] and faces
//! are found through [`FaceLocator`]; the SCRFD locator in [`detector`] runs
//! on ONNX Runtime.

pub mod access;
pub mod audit;
pub mod capture;
pub mod command;
pub mod config;
pub mod detector;
pub mod enroll;
pub mod matcher;
pub mod policy;
pub mod store;
pub mod template;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use access::{AccessController, AccessError, AuthSystem, LoopSettings, Session, Verdict};
pub use audit::{AccessAttempt, AuditLog, Outcome};
pub use capture::{CaptureError, FaceLocator, FrameSource};
pub use command::{CommandSource, OperatorCommand};
pub use config::Config;
pub use detector::ScrfdLocator;
pub use matcher::{Matcher, PixelDiffMatcher};
pub use policy::{Profile, ProfileLevel, SecurityPolicy};
pub use store::{TemplateSet, TemplateStore};
pub use template::Template;
pub use types::{FaceRegion, Frame, Identity};
