// Office telemetry records and defaults
pub mod model;

// Snapshot store backends and change notification
pub mod store;

// Per-connection change detection
pub mod detector;

// Topic channels, control messages and seeding
pub mod relay;

// HTTP and WebSocket APIs
pub mod api;

// File and environment configuration
pub mod config;
