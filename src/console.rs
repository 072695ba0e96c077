use std::io::{self, BufRead};

use tokio::sync::mpsc;

/// Forward stdin lines to the control loop from a detached thread.
pub fn spawn() -> io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new().name("console".into()).spawn(move || {
        for line in io::stdin().lock().lines().map_while(Result::ok) {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    })?;
    Ok(rx)
}
