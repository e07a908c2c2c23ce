//! Property tests for the fixed-frame codec.

use chatframe_proto::{FRAME_LEN, Message};
use proptest::prelude::*;

/// Single-token fields: usernames, passwords, filenames.
fn token() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.]{1,16}"
}

/// Free text: printable ASCII without leading/trailing whitespace, short
/// enough that any message built from it fits one frame.
fn text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9!?.,]([a-zA-Z0-9 !?.,]{0,60}[a-zA-Z0-9!?.,])?"
}

fn message() -> impl Strategy<Value = Message> {
    prop_oneof![
        Just(Message::Idle),
        Just(Message::Logout),
        Just(Message::List),
        (token(), token()).prop_map(|(user, pass)| Message::Register { user, pass }),
        (token(), token()).prop_map(|(user, pass)| Message::Login { user, pass }),
        token().prop_map(|user| Message::LoginOk { user }),
        text().prop_map(|text| Message::Send { text }),
        (token(), text()).prop_map(|(to, text)| Message::Send2 { to, text }),
        text().prop_map(|text| Message::SendA { text }),
        (token(), text()).prop_map(|(to, text)| Message::SendA2 { to, text }),
        token().prop_map(|filename| Message::SendF { filename }),
        (token(), 0usize..1 << 32, token())
            .prop_map(|(user, size, filename)| Message::RecvF { user, size, filename }),
        (token(), token(), 0usize..1 << 32, token()).prop_map(
            |(target, user, size, filename)| Message::RecvF4 { target, user, size, filename }
        ),
        (token(), token()).prop_map(|(user, filename)| Message::Listen { user, filename }),
        (0usize..1 << 32, token()).prop_map(|(size, filename)| Message::Recv { size, filename }),
        token().prop_map(|user| Message::Terminate { user }),
        text().prop_map(|text| Message::Print { text }),
        text().prop_map(|text| Message::Error { text }),
    ]
}

proptest! {
    #[test]
    fn encode_decode_round_trips(msg in message()) {
        let frame = msg.encode().unwrap();
        prop_assert_eq!(frame.len(), FRAME_LEN);
        prop_assert_eq!(Message::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn decode_ignores_trailing_padding(msg in message(), pad in 0usize..64) {
        let mut frame = msg.encode().unwrap();
        frame.extend(std::iter::repeat_n(0u8, pad));
        prop_assert_eq!(Message::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..FRAME_LEN)) {
        let _ = Message::decode(&bytes);
    }
}
