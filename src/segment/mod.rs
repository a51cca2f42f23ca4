//! On-disk segment layout: the CRC-framed record codec, the append-only
//! log file, the per-endpoint segment store (C1), and the filename scheme
//! that keeps a directory listing sorted in write order.

pub mod frame;
pub mod log;
pub mod naming;
pub mod store;

pub use frame::HintFrame;
pub use log::{SegmentLog, SegmentReader};
pub use store::{EndpointSegmentStore, SegmentStoreFactory};
