//! Dashboard data: the charted window, latest-value slots and snapshots.
//!
//! ## Submodules
//!
//! - [`window`]: the bounded, forward-filled [`TimeSeriesWindow`]
//! - [`latest`]: overwrite-only slots ([`AuxiliaryLatest`], [`SensorReadings`])
//! - [`snapshot`]: [`DashboardSnapshot`], the copy handed to the presentation layer
//!
//! ## Data Flow
//!
//! ```text
//! MessageRouter::route(topic, payload)
//!        │
//!        ├──▶ SensorReadings::set (raw card value)
//!        ├──▶ TimeSeriesWindow::append (numeric readings only)
//!        └──▶ AuxiliaryLatest::set (free-text channels)
//!                     │
//!                     ▼
//!          DashboardSnapshot::capture()
//! ```

pub mod latest;
pub mod snapshot;
pub mod window;

pub use latest::{AuxiliaryLatest, SensorReadings};
pub use snapshot::DashboardSnapshot;
pub use window::{TimeSeriesWindow, TimeSlot, DEFAULT_WINDOW_SIZE};
