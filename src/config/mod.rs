//! Configuration management for Skriv.

mod settings;

pub use settings::{
    DispatcherSettings, IntakeSettings, ServerSettings, Settings, StorageSettings,
    TranscriptionSettings,
};
