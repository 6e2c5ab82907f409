//! Protocol components: frame format, transport paths, the bus arbitration
//! state machine and the diagnostic engine.
pub mod arbitration;
pub mod diagnostics;
pub mod frame;
pub mod transport;
