//! Auxiliary-leg failure handling against a hand-rolled fake server.
//!
//! The fake server accepts the control connection and then stops listening,
//! so the auxiliary dial triggered by its `LISTEN` push is refused. The
//! client must report that one transfer as failed and keep running on the
//! control connection.

use std::{
    io::{Read, Write},
    net::TcpListener,
    thread,
};

use chatframe_client::{ClientReactor, parse_script};
use chatframe_core::{client::ClientEngine, store::MemoryBlobStore};
use chatframe_proto::FRAME_LEN;

fn frame(line: &str) -> Vec<u8> {
    let mut buf = vec![0u8; FRAME_LEN];
    buf[..line.len()].copy_from_slice(line.as_bytes());
    buf
}

#[test]
fn refused_aux_dial_fails_one_transfer_not_the_client() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut control, _) = listener.accept().unwrap();
        // No further accepts: the auxiliary dial will be refused.
        drop(listener);

        let mut login = vec![0u8; FRAME_LEN];
        control.read_exact(&mut login).unwrap();
        assert!(login.starts_with(b"LOGIN alice"));

        control.write_all(&frame("LOGIN alice")).unwrap();
        control.write_all(&frame("LISTEN bobby notes.txt")).unwrap();

        // Hold the control connection open until the client is done.
        let mut byte = [0u8; 1];
        let _ = control.read(&mut byte);
    });

    let script = parse_script("LOGIN alice pass1\nDELAY 2000\n").unwrap();
    let mut client =
        ClientReactor::connect(addr, ClientEngine::new(MemoryBlobStore::new()), script).unwrap();
    client.run().unwrap();

    let lines = client.delivered();
    assert!(lines.contains(&"Logged in as 'alice'.".to_string()));
    assert!(lines.contains(&"Cannot receive 'notes.txt': connection failed.".to_string()));
    assert!(!client.engine().transfer_busy());

    drop(client);
    server.join().unwrap();
}
