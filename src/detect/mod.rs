//! Recognition data model, backends and result normalization.
//!
//! - `backend`: the `RecognitionBackend` capability every model implements.
//! - `backends`: stub, CPU localizer, ONNX classifier (feature `backend-tract`).
//! - `registry`: ordered, shared model slots built from configuration.
//! - `observation` / `normalize`: raw backend output and its conversion into
//!   confidence-sorted `Detection`s.
//! - `overlap`: directional overlap score and the same-object predicate.

mod backend;
pub mod backends;
mod normalize;
mod observation;
mod overlap;
mod registry;
mod result;

pub use backend::{Availability, BackendKind, RecognitionBackend};
pub use backends::{LumaLocalizer, StubBackend, UnavailableBackend};
pub use normalize::{normalize, DEFAULT_OBJECT_LABEL};
pub use observation::{ClassLabel, RawObservation};
pub use overlap::{box_overlap, suppress_duplicates, SAME_OBJECT_THRESHOLD};
pub use registry::{BackendRegistry, ModelSlot, SharedBackend};
pub use result::{BoundingBox, Detection, DetectionId, RecognitionResult};
