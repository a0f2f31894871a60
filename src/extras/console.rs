use crate::wsclient::ShutdownHandle;
use std::io::{BufRead, BufReader};
use std::thread::JoinHandle;

/// Waits on stdin in a dedicated thread and requests shutdown once Enter is pressed or stdin
/// closes. The blocking read never runs on the async runtime.
pub fn spawn_disconnect_listener(shutdown: ShutdownHandle) -> JoinHandle<()> {
    spawn_disconnect_listener_from(BufReader::new(std::io::stdin()), shutdown)
}

/// Same as [`spawn_disconnect_listener`] over any line oriented reader
pub fn spawn_disconnect_listener_from<R>(mut reader: R, shutdown: ShutdownHandle) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    std::thread::spawn(move || {
        println!("\nPress Enter to disconnect...\n");
        let mut line = String::new();
        if let Err(e) = reader.read_line(&mut line) {
            log::warn!("Console read failed: {}", e);
        }
        log::info!("Disconnect command received.");
        shutdown.request();
    })
}
