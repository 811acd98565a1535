pub mod controller;
pub mod event;
pub mod handle;
pub mod scheduler;
pub mod state;
pub mod telemetry;
pub mod time;
pub mod transcript;
