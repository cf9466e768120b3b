pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::{ClassifierTap, ScriptedClassifier, ScriptedLocalizer};

#[cfg(feature = "backend-tract")]
pub use tract::{TractFaceLocalizer, TractMaskClassifier};
