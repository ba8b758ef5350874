mod backend;
mod backends;
mod model;
mod result;

pub use backend::{Detector, DetectorCall, TrackSessionId};
pub use backends::ScriptedDetector;
pub use model::{CallSlot, ModelHandle};
pub use result::{ClassTable, RawDetection};
