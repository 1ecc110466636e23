pub mod cpu;
pub mod stub;
pub mod unavailable;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use cpu::LumaLocalizer;
pub use stub::StubBackend;
pub use unavailable::UnavailableBackend;

#[cfg(feature = "backend-tract")]
pub use tract::OnnxClassifier;
