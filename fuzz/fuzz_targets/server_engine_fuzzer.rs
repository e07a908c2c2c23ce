//! Fuzz target for the server engine's event handling
//!
//! Replays an arbitrary interleaving of connection events against a fresh
//! engine over in-memory stores. The engine must never panic: unknown
//! connections, garbage frames, bodies with no pending upload, and repeated
//! closes all have to degrade into replies or teardowns.

#![no_main]

use arbitrary::Arbitrary;
use chatframe_core::{
    server::{ServerConfig, ServerEngine, ServerEvent},
    table::ConnId,
};
use chatframe_core::store::{MemoryBlobStore, MemoryUserStore};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum FuzzEvent {
    Accept { conn: u8 },
    Frame { conn: u8, bytes: Vec<u8> },
    Body { conn: u8, data: Vec<u8> },
    Close { conn: u8 },
}

fuzz_target!(|events: Vec<FuzzEvent>| {
    let mut engine = ServerEngine::new(
        MemoryUserStore::new(),
        MemoryBlobStore::new(),
        ServerConfig::default(),
    );
    for event in events {
        let event = match event {
            FuzzEvent::Accept { conn } => ServerEvent::Accepted {
                conn: ConnId::from_raw(u64::from(conn) + 1),
            },
            FuzzEvent::Frame { conn, bytes } => ServerEvent::Frame {
                conn: ConnId::from_raw(u64::from(conn) + 1),
                bytes,
            },
            FuzzEvent::Body { conn, data } => ServerEvent::Body {
                conn: ConnId::from_raw(u64::from(conn) + 1),
                data,
            },
            FuzzEvent::Close { conn } => ServerEvent::Closed {
                conn: ConnId::from_raw(u64::from(conn) + 1),
            },
        };
        let _ = engine.process_event(event);
    }
});
