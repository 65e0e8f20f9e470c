pub mod classifier;
pub mod controller;
pub mod loop_worker;
pub mod orchestrator;
pub mod sample;
pub mod transport;
pub mod window;

pub use classifier::{ProcessClassifier, WindowClassifier};
pub use controller::PipelineController;
pub use loop_worker::{fall_loop, reasoning_loop, ReasoningOutcome};
pub use orchestrator::{LinePossibilitySource, OrchestratorStats, StreamOrchestrator};
pub use sample::ImuSample;
pub use transport::{open_device, DeviceTransport, LineTransport, ReaderTransport};
pub use window::SlidingWindow;
