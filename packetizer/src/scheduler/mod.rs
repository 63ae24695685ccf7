//! Packet scheduling
//!
//! [`Packetizer`] is the single logical coordinator; [`SharedPacketizer`]
//! serializes access to it for transports running on several tasks.

mod builder;
mod packet;
mod packetizer;
mod selector;
mod shared;
mod worker;

pub use packet::{CompletionReport, Packet, PacketReply};
pub use packetizer::Packetizer;
pub use shared::SharedPacketizer;
pub use worker::{WorkerId, WorkerSpec, WorkerState, WorkerStatus};
