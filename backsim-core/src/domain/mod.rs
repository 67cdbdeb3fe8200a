//! Domain types for the simulation engine.

pub mod account;
pub mod bar;
pub mod event;
pub mod position;
pub mod series;

pub use account::AccountState;
pub use bar::{Candle, CandleBody};
pub use event::{OrderEvent, OrderEventKind};
pub use position::{PositionState, PositionStatus, Side};
pub use series::{PriceSeries, SeriesError};
