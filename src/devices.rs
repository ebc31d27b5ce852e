//! Keyboard discovery from the kernel's input device listing.
//!
//! The listing (`/proc/bus/input/devices`) describes one device per
//! paragraph, with tagged lines like `I: Bus=0003 Vendor=...` and
//! `H: Handlers=sysrq kbd event4 leds`. A paragraph qualifies as a
//! keyboard when it is not on the virtual bus, none of its handlers look
//! like a mouse or joystick, and (by default) it carries the `kbd`
//! handler. Qualifying paragraphs contribute their handler tokens; the
//! `event*` tokens among them name the interceptable character devices.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

pub const DEFAULT_DEVICES_FILE: &str = "/proc/bus/input/devices";
pub const DEFAULT_INPUT_DIR: &str = "/dev/input";

/// Virtual bus number, used by uinput devices (including our own injector).
const BUS_VIRTUAL: u16 = 0x06;

/// Scan state for the current paragraph, reset at every blank line.
///
/// The state starts as a fresh, usable record so a listing without a
/// leading blank line still contributes its first device.
#[derive(Debug, Default)]
struct ScanState {
    /// The paragraph has been ruled out (virtual bus, or a pointer or
    /// joystick handler was seen).
    skip_record: bool,
}

/// Collect the handler tokens of every qualifying keyboard paragraph.
///
/// An unreadable listing is an error; a readable listing with no
/// qualifying paragraphs is an empty result. Callers that need to react
/// to "nothing found" must check for emptiness themselves.
pub fn keyboard_handlers(devices_file: &Path, require_kbd: bool) -> Result<BTreeSet<String>> {
    let file = File::open(devices_file)
        .with_context(|| format!("cannot open device listing {}", devices_file.display()))?;
    collect_handlers(BufReader::new(file), require_kbd)
        .with_context(|| format!("cannot read device listing {}", devices_file.display()))
}

fn collect_handlers(input: impl BufRead, require_kbd: bool) -> io::Result<BTreeSet<String>> {
    let mut handlers = BTreeSet::new();
    let mut state = ScanState::default();
    for line in input.lines() {
        scan_line(&line?, &mut state, require_kbd, &mut handlers);
    }
    Ok(handlers)
}

fn scan_line(line: &str, state: &mut ScanState, require_kbd: bool, out: &mut BTreeSet<String>) {
    let line = line.trim();
    if line.is_empty() {
        *state = ScanState::default();
        return;
    }
    if state.skip_record {
        return;
    }
    if is_virtual_bus(line) {
        state.skip_record = true;
        return;
    }
    let Some(tokens) = handler_tokens(line) else {
        return;
    };
    // Auto-detected mice and joysticks can destabilize the whole session
    // when grabbed; one such handler rules out the entire record, even a
    // mixed-capability one that also has kbd.
    if tokens.iter().any(|token| is_pointer_handler(token)) {
        state.skip_record = true;
        return;
    }
    if !require_kbd || tokens.contains("kbd") {
        out.extend(tokens);
    }
}

/// `I: Bus=0006 ...` marks a virtual device. Bus values are hex.
fn is_virtual_bus(line: &str) -> bool {
    let Some(rest) = strip_field_tag(line, 'I') else {
        return false;
    };
    rest.split_whitespace().any(|field| {
        field
            .get(..4)
            .is_some_and(|name| name.eq_ignore_ascii_case("bus="))
            && field
                .get(4..)
                .and_then(|value| u16::from_str_radix(value, 16).ok())
                == Some(BUS_VIRTUAL)
    })
}

/// The whitespace-separated tokens of an `H: Handlers=...` line, if this
/// is one. Field names match case-insensitively, `HANDLER=` included.
fn handler_tokens(line: &str) -> Option<BTreeSet<String>> {
    let rest = strip_field_tag(line, 'H')?;
    let (name, values) = rest.split_once('=')?;
    let name = name.trim();
    let is_handlers_field = name
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("handler"))
        && name[7..].chars().all(|c| c.is_ascii_alphabetic());
    if !is_handlers_field {
        return None;
    }
    Some(values.split_whitespace().map(str::to_string).collect())
}

/// Strip a `X:` line tag, returning the remainder of the line.
fn strip_field_tag(line: &str, tag: char) -> Option<&str> {
    let mut chars = line.chars();
    if !chars.next()?.eq_ignore_ascii_case(&tag) {
        return None;
    }
    chars
        .as_str()
        .trim_start()
        .strip_prefix(':')
        .map(str::trim_start)
}

fn is_pointer_handler(token: &str) -> bool {
    starts_with_ignore_case(token, "js") || starts_with_ignore_case(token, "mouse")
}

/// Only the `event*` character-device interfaces are interceptable.
fn is_event_handler(token: &str) -> bool {
    starts_with_ignore_case(token, "event")
}

fn starts_with_ignore_case(token: &str, prefix: &str) -> bool {
    token
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Map handler tokens to device file paths under the input directory,
/// dropping everything that is not an event interface.
pub fn event_paths(handlers: &BTreeSet<String>, input_dir: &Path) -> Vec<PathBuf> {
    handlers
        .iter()
        .filter(|handler| is_event_handler(handler))
        .map(|handler| input_dir.join(handler))
        .collect()
}

/// Resolve explicit device arguments: a verbatim path that exists wins,
/// then the same name under the input directory; anything else is dropped
/// rather than guessed at.
pub fn resolve_args(args: &[String], input_dir: &Path) -> Vec<PathBuf> {
    let mut paths = BTreeSet::new();
    for arg in args {
        let verbatim = PathBuf::from(arg);
        if verbatim.exists() {
            paths.insert(verbatim);
            continue;
        }
        let nested = input_dir.join(arg);
        if nested.exists() {
            paths.insert(nested);
        }
    }
    paths.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn handlers(listing: &str, require_kbd: bool) -> BTreeSet<String> {
        collect_handlers(listing.as_bytes(), require_kbd).unwrap()
    }

    fn set(tokens: &[&str]) -> BTreeSet<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn virtual_bus_paragraph_contributes_nothing() {
        let listing = "I: Bus=0003 Vendor=046d Product=c31c\n\
                       H: Handlers=sysrq kbd event4\n\
                       \n\
                       I: Bus=0006 Vendor=0000 Product=0000\n\
                       H: Handlers=kbd event9\n";
        assert_eq!(handlers(listing, true), set(&["sysrq", "kbd", "event4"]));
    }

    #[test]
    fn two_paragraph_scenario_keeps_only_the_physical_event() {
        let listing = "I: Bus=0003\n\
                       H: Handlers=kbd event4\n\
                       \n\
                       I: Bus=0006\n\
                       H: Handlers=kbd event9\n";
        let found = handlers(listing, true);
        let paths = event_paths(&found, Path::new("/dev/input"));
        assert_eq!(paths, vec![PathBuf::from("/dev/input/event4")]);
    }

    #[test]
    fn mouse_handler_disqualifies_the_whole_record() {
        let listing = "I: Bus=0003\nH: Handlers=kbd mouse2 event5\n";
        assert!(handlers(listing, true).is_empty());
    }

    #[test]
    fn joystick_handler_disqualifies_the_whole_record() {
        let listing = "I: Bus=0003\nH: Handlers=kbd js0 event6\n";
        assert!(handlers(listing, true).is_empty());
    }

    #[test]
    fn kbd_gate_excludes_plain_event_devices() {
        let listing = "I: Bus=0019\nH: Handlers=event7\n";
        assert!(handlers(listing, true).is_empty());
        assert_eq!(handlers(listing, false), set(&["event7"]));
    }

    #[test]
    fn first_paragraph_needs_no_leading_blank_line() {
        let listing = "I: Bus=0003\nH: Handlers=kbd event0\n";
        assert_eq!(handlers(listing, true), set(&["kbd", "event0"]));
    }

    #[test]
    fn field_matching_is_case_insensitive() {
        let listing = "i: BUS=0006\nh: HANDLERS=kbd event1\n\
                       \n\
                       i: bus=0003\nh: handlers=kbd event2\n";
        assert_eq!(handlers(listing, true), set(&["kbd", "event2"]));
    }

    #[test]
    fn bus_values_are_hex_with_any_zero_padding() {
        // 0x19 is the host bus, not virtual, despite containing a 6-free
        // value; 06 and 0006 are both the virtual bus.
        let listing = "I: Bus=0019\nH: Handlers=kbd event1\n\
                       \n\
                       I: Bus=06\nH: Handlers=kbd event2\n\
                       \n\
                       I: Bus=0006\nH: Handlers=kbd event3\n";
        assert_eq!(handlers(listing, true), set(&["kbd", "event1"]));
    }

    #[test]
    fn tokens_are_deduplicated_across_records() {
        let listing = "I: Bus=0003\nH: Handlers=kbd event4\n\
                       \n\
                       I: Bus=0011\nH: Handlers=kbd event4 event5\n";
        assert_eq!(handlers(listing, true), set(&["kbd", "event4", "event5"]));
    }

    #[test]
    fn enumeration_is_idempotent() {
        let listing = "I: Bus=0003\nH: Handlers=sysrq kbd leds event4\n";
        assert_eq!(handlers(listing, true), handlers(listing, true));
    }

    #[test]
    fn field_order_within_a_paragraph_does_not_matter() {
        let listing = "H: Handlers=kbd event8\nI: Bus=0003\n";
        assert_eq!(handlers(listing, true), set(&["kbd", "event8"]));
    }

    #[test]
    fn unreadable_listing_is_an_error_not_an_empty_result() {
        let missing = Path::new("/definitely/not/a/real/listing");
        assert!(keyboard_handlers(missing, true).is_err());
        assert!(handlers("", true).is_empty());
    }

    #[test]
    fn only_event_handlers_become_paths() {
        let found = set(&["kbd", "sysrq", "leds", "event4", "event11"]);
        let paths = event_paths(&found, Path::new("/dev/input"));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/dev/input/event11"),
                PathBuf::from("/dev/input/event4"),
            ]
        );
    }

    #[test]
    fn args_resolve_against_existing_files_only() {
        let dir = std::env::temp_dir().join(format!("pressq-resolve-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("event3"), b"").unwrap();

        let args = vec![
            "event3".to_string(),
            "event99".to_string(),
            dir.join("event3").display().to_string(),
        ];
        let resolved = resolve_args(&args, &dir);
        // The bare name and the full path name the same file; event99 does
        // not exist and is dropped, never substituted with a guess.
        assert_eq!(resolved, vec![dir.join("event3")]);

        fs::remove_dir_all(&dir).unwrap();
    }
}
