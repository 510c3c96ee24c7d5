pub mod audio;
pub mod config;
pub mod midi;
pub mod ui;

pub use audio::{EngineHandle, EngineSettings, LoopEngine};
pub use config::Config;
pub use ui::TerminalUI;
