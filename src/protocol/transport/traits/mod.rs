//! Platform seams used by the transport layer: the open-drain bus pin, the
//! CPU cycle counter, an async millisecond timer and the edge interrupt entry.
pub mod bus_line;
pub mod bus_timer;
pub mod cycle_clock;
pub mod edge_listener;
