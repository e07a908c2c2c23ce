//! Fuzz target for Message::decode
//!
//! Feeds arbitrary byte sequences to the frame decoder. Invalid input must
//! come back as a structured error; the decoder must never panic, whatever
//! the padding, encoding, or argument shape.

#![no_main]

use chatframe_proto::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = Message::decode(data) {
        // Anything that decodes must re-encode unless it overflows the frame,
        // and the round trip must land on the same message.
        if let Ok(frame) = msg.encode() {
            let again = Message::decode(&frame).unwrap();
            assert_eq!(again, msg);
        }
    }
});
