pub mod desk;
pub mod recorder;
pub mod relay;
pub mod session;
pub mod source;

pub use desk::{CaptureDesk, StreamTeardown};
pub use recorder::{artifact_file_name, ChunkRecorder, ExportTarget, RecordingArtifact};
pub use relay::{DeviceAttachment, DeviceRelay};
pub use session::{ConnectionState, EvidenceCaptureSession, RecordingState, SessionSnapshot};
pub use source::{MediaFrame, MediaHandle, MediaSource, TrackSet};
