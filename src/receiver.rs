use chrono::Local;
use evdev::KeyCode;
use std::sync::Arc;
use tokio::sync::watch;

use crate::signal::{Mods, Signal, SignalReceiver, key_name};

/// The demo's receiver: prints every dispatched signal and requests
/// shutdown when the quit key shows up.
pub struct ConsoleReceiver {
    quit_key: KeyCode,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ConsoleReceiver {
    pub fn new(quit_key: KeyCode, shutdown: Arc<watch::Sender<bool>>) -> Self {
        Self { quit_key, shutdown }
    }
}

impl SignalReceiver for ConsoleReceiver {
    fn receive(&self, signal: &Signal, mods: Mods) -> bool {
        let stamp = Local::now().format("%H:%M:%S%.3f").to_string();
        println!(
            "[{stamp}] Signal kind: {}, modifiers: {}",
            signal.kind_name(),
            mods.bits()
        );
        match signal {
            Signal::Key { code, apply } => {
                println!(
                    "[{stamp}] Key: {}:{}, apply: {apply}",
                    code.code(),
                    key_name(*code)
                );
                // Flip the termination flag once; later receipts of the
                // quit key land while the main loop is already exiting.
                if *code == self.quit_key && !*self.shutdown.borrow() {
                    println!("🔚 Quit key pressed. Closing.");
                    let _ = self.shutdown.send(true);
                }
            }
            Signal::Other { code, value, .. } => {
                println!("[{stamp}] Payload: code {code}, value {value}");
            }
        }
        // Pass-through policy: never consume on behalf of other listeners.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::KeyApply;

    fn receiver(quit_key: KeyCode) -> (ConsoleReceiver, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (ConsoleReceiver::new(quit_key, Arc::new(tx)), rx)
    }

    #[test]
    fn quit_key_flips_the_flag_once_and_still_passes_through() {
        let (recv, flag) = receiver(KeyCode::KEY_Q);
        let quit = Signal::Key {
            code: KeyCode::KEY_Q,
            apply: KeyApply::Set,
        };

        assert!(recv.receive(&quit, Mods::empty()));
        assert!(*flag.borrow());

        // A second receipt is a harmless no-op.
        assert!(recv.receive(&quit, Mods::empty()));
        assert!(*flag.borrow());
    }

    #[test]
    fn other_keys_leave_the_flag_alone() {
        let (recv, flag) = receiver(KeyCode::KEY_Q);
        let key = Signal::Key {
            code: KeyCode::KEY_A,
            apply: KeyApply::Set,
        };
        assert!(recv.receive(&key, Mods::SHIFT));
        assert!(!*flag.borrow());
    }

    #[test]
    fn non_key_signals_pass_through_without_touching_the_flag() {
        let (recv, flag) = receiver(KeyCode::KEY_Q);
        let other = Signal::Other {
            kind: evdev::EventType::RELATIVE,
            code: 8,
            value: -1,
        };
        assert!(recv.receive(&other, Mods::empty()));
        assert!(!*flag.borrow());
    }
}
