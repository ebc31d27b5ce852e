//! # pressq - keyboard interception demo
//!
//! Enumerates the local keyboard input devices, registers them for
//! low-level interception, and prints every dispatched key signal to the
//! console until the quit key (Q by default) is pressed on an intercepted
//! keyboard, or the process receives a termination signal.
//!
//! ## Usage
//! ```bash
//! # Intercept all auto-detected keyboards
//! sudo pressq
//!
//! # Intercept specific devices (bare names or full paths)
//! sudo pressq event3 /dev/input/event7
//!
//! # List the keyboards auto-detection would pick
//! sudo pressq --list-devices
//!
//! # Exclusive grab: nothing reaches the rest of the system unless the
//! # receiver passes it through
//! sudo pressq --block
//!
//! # Grab and re-inject every key as its neighbor. You were warned.
//! sudo pressq --mangle
//! ```
//!
//! ## Architecture
//! - `main.rs` - CLI, wiring, and the termination-flag polling loop
//! - `devices.rs` - keyboard discovery and intercept-list resolution
//! - `intercept.rs` - device grabbing, dispatch workers, re-injection
//! - `receiver.rs` - the console signal receiver
//! - `signal.rs` - signal model and the receiver seam
//! - `config.rs` - interception policy (config file + CLI flags)

mod config;
mod devices;
mod intercept;
mod receiver;
mod signal;

use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::watch;

use config::Policy;
use intercept::Interceptor;
use receiver::ConsoleReceiver;

/// How often the main loop rechecks the termination flag.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let matches = Command::new("pressq")
        .version("0.1.0")
        .about("Keyboard interception demo - prints intercepted key signals until the quit key is pressed")
        .arg(
            Arg::new("devices")
                .value_name("DEVICE")
                .num_args(0..)
                .help("Devices to intercept (bare names like event3, or full paths); omit to auto-detect keyboards")
        )
        .arg(
            Arg::new("list-devices")
                .short('l')
                .long("list-devices")
                .action(ArgAction::SetTrue)
                .help("List the keyboards auto-detection finds, then exit")
        )
        .arg(
            Arg::new("block")
                .long("block")
                .action(ArgAction::SetTrue)
                .help("Grab devices exclusively; events only reach other consumers by re-injection")
        )
        .arg(
            Arg::new("mangle")
                .long("mangle")
                .action(ArgAction::SetTrue)
                .help("Re-inject every key as its neighbor (code + 1); implies --block")
        )
        .arg(
            Arg::new("all-signals")
                .long("all-signals")
                .action(ArgAction::SetTrue)
                .help("Dispatch every signal kind to the receiver, not just keys")
        )
        .arg(
            Arg::new("no-kbd-filter")
                .long("no-kbd-filter")
                .action(ArgAction::SetTrue)
                .help("Also auto-detect devices that have no kbd handler")
        )
        .arg(
            Arg::new("quit-key")
                .long("quit-key")
                .value_name("KEY")
                .help("Quit key, by name or numeric code (default KEY_Q)")
        )
        .arg(
            Arg::new("devices-file")
                .long("devices-file")
                .value_name("PATH")
                .help("Device status listing to enumerate from (default /proc/bus/input/devices)")
        )
        .arg(
            Arg::new("input-dir")
                .long("input-dir")
                .value_name("PATH")
                .help("Directory holding the event devices (default /dev/input)")
        )
        .get_matches();

    let mut policy = Policy::load();
    if matches.get_flag("block") {
        policy.block = true;
    }
    if matches.get_flag("mangle") {
        policy.mangle = true;
    }
    if matches.get_flag("all-signals") {
        policy.keys_only = false;
    }
    if matches.get_flag("no-kbd-filter") {
        policy.require_kbd = false;
    }
    if let Some(key) = matches.get_one::<String>("quit-key") {
        policy.quit_key = key.clone();
    }
    if let Some(path) = matches.get_one::<String>("devices-file") {
        policy.devices_file = PathBuf::from(path);
    }
    if let Some(path) = matches.get_one::<String>("input-dir") {
        policy.input_dir = PathBuf::from(path);
    }
    policy.normalize();

    if matches.get_flag("list-devices") {
        list_devices(&policy);
        return Ok(());
    }

    let quit_key = match signal::key_by_name(&policy.quit_key) {
        Some(key) => key,
        None => {
            eprintln!("❌ Unknown quit key: {}", policy.quit_key);
            return Ok(());
        }
    };

    println!(
        "⌨️  pressq interception demo. To end, press {} on an intercepted keyboard, or Ctrl+C.",
        signal::key_name(quit_key)
    );

    // The termination flag: written by the receiver (quit key) and the
    // signal handler, polled below. Both writers only ever set it.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let handler_tx = Arc::clone(&shutdown_tx);
    ctrlc::set_handler(move || {
        let _ = handler_tx.send(true);
    })?;

    let mut interceptor = Interceptor::new(policy.keys_only, policy.block, policy.mangle);
    interceptor.set_receiver(Arc::new(ConsoleReceiver::new(
        quit_key,
        Arc::clone(&shutdown_tx),
    )));

    let args: Vec<String> = matches
        .get_many::<String>("devices")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let paths = intercept_list(&args, &policy);
    if paths.is_empty() {
        // Soft failure: keep running so Ctrl+C still ends the demo the
        // same way.
        eprintln!("⚠️  Nothing to intercept; running idle.");
    } else if let Err(e) = interceptor.set_grabs(&paths) {
        eprintln!("⚠️  {e:#}");
    } else {
        println!("📡 Intercepting {} device(s)", interceptor.device_count());
    }

    if let Err(e) = interceptor.enable() {
        eprintln!("⚠️  Interception not enabled: {e:#}");
    }

    while !*shutdown_rx.borrow() {
        thread::sleep(POLL_INTERVAL);
    }

    println!("🛑 Shutting down...");
    // Interception must be off before the interceptor goes away.
    interceptor.disable();
    drop(interceptor);

    println!("👋 pressq stopped.");
    Ok(())
}

/// Build the intercept list: explicit arguments win; otherwise enumerate
/// keyboards from the status listing. Failures resolve to an empty list
/// so the caller can continue on the soft-failure path.
fn intercept_list(args: &[String], policy: &Policy) -> Vec<PathBuf> {
    if !args.is_empty() {
        return devices::resolve_args(args, &policy.input_dir);
    }
    match devices::keyboard_handlers(&policy.devices_file, policy.require_kbd) {
        Ok(handlers) if handlers.is_empty() => {
            eprintln!(
                "⚠️  No keyboard handlers found in {}",
                policy.devices_file.display()
            );
            Vec::new()
        }
        Ok(handlers) => devices::event_paths(&handlers, &policy.input_dir),
        Err(e) => {
            eprintln!("⚠️  Keyboard detection failed: {e:#}");
            Vec::new()
        }
    }
}

fn list_devices(policy: &Policy) {
    println!("🔍 Scanning for keyboard devices...\n");
    let handlers = match devices::keyboard_handlers(&policy.devices_file, policy.require_kbd) {
        Ok(handlers) => handlers,
        Err(e) => {
            eprintln!("❌ {e:#}");
            return;
        }
    };
    let paths = devices::event_paths(&handlers, &policy.input_dir);
    if paths.is_empty() {
        println!("❌ No keyboard devices found!");
        println!(
            "💡 Try running with sudo or check {} permissions",
            policy.input_dir.display()
        );
        return;
    }
    println!("📱 Found {} keyboard device(s):", paths.len());
    for path in &paths {
        match evdev::Device::open(path) {
            Ok(device) => println!(
                "  {} ({})",
                path.display(),
                device.name().unwrap_or("unnamed")
            ),
            Err(e) => println!("  {} (unreadable: {e})", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_policy(dir: &std::path::Path) -> Policy {
        Policy {
            devices_file: dir.join("devices"),
            input_dir: dir.to_path_buf(),
            ..Policy::default()
        }
    }

    #[test]
    fn explicit_arguments_bypass_enumeration() {
        let dir = std::env::temp_dir().join(format!("pressq-args-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("event2"), b"").unwrap();

        let policy = scratch_policy(&dir);
        // No status listing exists, but explicit arguments never touch it.
        let paths = intercept_list(&["event2".to_string()], &policy);
        assert_eq!(paths, vec![dir.join("event2")]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn enumeration_feeds_the_intercept_list() {
        let dir = std::env::temp_dir().join(format!("pressq-enum-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("devices"),
            "I: Bus=0003\nH: Handlers=kbd event0\n\n\
             I: Bus=0006\nH: Handlers=kbd event1\n",
        )
        .unwrap();

        let policy = scratch_policy(&dir);
        let paths = intercept_list(&[], &policy);
        assert_eq!(paths, vec![dir.join("event0")]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failed_enumeration_resolves_to_an_empty_list() {
        let dir = std::env::temp_dir().join(format!("pressq-missing-{}", std::process::id()));
        let policy = scratch_policy(&dir);
        assert!(intercept_list(&[], &policy).is_empty());
    }
}
