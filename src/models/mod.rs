/// GLB container split (JSON + BIN chunks).
pub mod glb;
/// glTF scene import into the neutral representation.
pub mod gltf_import;
/// Neutral in-memory scene graph shared by the emitters.
pub mod scene;
