//! Diagnosis events
//!
//! - `types`: the event enum every stage transition is reported as
//! - `bus`: broadcast pub/sub for any number of subscribers
//! - `sink`: per-run fan-out to the audit log, the bus and the run stream

pub mod bus;
pub mod sink;
pub mod types;

pub use bus::{
    EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter, FilteredReceiver,
    SharedEventBus,
};
pub use sink::EventSink;
pub use types::{DiagnosisEvent, RunId};
