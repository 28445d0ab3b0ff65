//! Registration of volumetric image time sequences through the external
//! elastix/transformix engine.
//!
//! The crate splits into a single-pair driver ([`ElastixEngine`]) that owns
//! subprocess orchestration, and a sequence loop ([`SequenceRegistration`])
//! that walks a time sequence frame by frame and assembles the output
//! sequences. Volumes cross the process boundary as MetaImage files.

pub mod cancel;
pub mod engine;
pub mod error;
pub mod metaimage;
pub mod presets;
pub mod sequence;
pub mod sequence_registration;
pub mod settings;
pub mod transform;
pub mod volume;

pub use cancel::CancelToken;
pub use engine::{ElastixEngine, LogCallback};
pub use error::{Error, Result};
pub use presets::{PresetCatalog, RegistrationPreset};
pub use sequence::{Browser, BrowserRegistry, IndexType, Sequence};
pub use sequence_registration::{SequenceOptions, SequenceRegistration};
pub use transform::{DisplacementField, Transform};
pub use volume::{ScalarType, Volume, VoxelData};
