pub mod historical;
pub mod normalizer;
pub mod orchestrator;
pub mod realtime;
