mod decoder;
mod detector;
mod label;
mod letterbox;
mod object;

pub use decoder::{resolve_frame_label, DecodeParams, DetectionBox};
pub use detector::{DetectError, Detector};
pub use label::{normalize_class_name, HazardLabel};
pub use object::OnnxBackend;

#[cfg(test)]
pub(crate) use decoder::{RawBox, RawOutput};
#[cfg(test)]
pub(crate) use detector::testing;
