pub mod vision;

pub use vision::{MediaInput, ModelAdapter, QualityVerdict, VisionClient};
