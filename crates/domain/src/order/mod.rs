//! Order lifecycle and line items.

mod model;
mod status;

pub use model::{DurationUnit, LineItem, NewOrder, Order};
pub use status::OrderStatus;
