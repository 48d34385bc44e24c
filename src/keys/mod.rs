/// Key lifecycle: metadata, the shared registry, the manager on top of it and
/// sealed export for restarts.
pub mod manager;
pub mod metadata;
pub mod registry;
pub mod sealed;

pub use manager::KeyManager;
pub use metadata::{
    KeyEvent, KeyHandle, KeyMaterial, KeyMetadata, KeyObserver, KeyOptions, KeyStatus, KeyType,
    RotationResult,
};
pub use registry::KeyRegistry;
pub use sealed::SealedKeyStore;
