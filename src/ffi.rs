//! FFI bindings for Synheart Engage
//!
//! This module provides C-compatible functions for driving a tracker from other
//! languages. All functions use C strings (null-terminated) and return allocated
//! memory that must be freed by the caller using `engage_free_string`.
//!
//! Times are passed as Unix epoch milliseconds.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, Utc};

use crate::config::EngageConfig;
use crate::lifecycle::PageTracker;
use crate::replay::{events_to_json, replay_ndjson};
use crate::schema::Signal;
use crate::sinks::MemorySink;
use crate::types::ExitIntentState;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Join already-encoded JSON objects into a JSON array
fn vec_to_json_array(vec: Vec<String>) -> String {
    format!("[{}]", vec.join(","))
}

/// NULL means default configuration
unsafe fn config_from_ptr(config_json: *const c_char) -> Result<EngageConfig, String> {
    if config_json.is_null() {
        return Ok(EngageConfig::default());
    }
    let json = cstr_to_string(config_json).ok_or("Invalid config string pointer")?;
    EngageConfig::from_json(&json).map_err(|e| e.to_string())
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Replay an NDJSON signal stream and return the dispatched events as a JSON array.
///
/// # Safety
/// - `ndjson` and `route` must be valid null-terminated C strings.
/// - `config_json` may be NULL for the default configuration.
/// - Returns a newly allocated string that must be freed with `engage_free_string`.
/// - Returns NULL on error; call `engage_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn engage_replay_ndjson(
    ndjson: *const c_char,
    route: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(ndjson) = cstr_to_string(ndjson) else {
        set_last_error("Invalid NDJSON string pointer");
        return ptr::null_mut();
    };
    let Some(route) = cstr_to_string(route) else {
        set_last_error("Invalid route string pointer");
        return ptr::null_mut();
    };
    let config = match config_from_ptr(config_json) {
        Ok(config) => config,
        Err(e) => {
            set_last_error(&e);
            return ptr::null_mut();
        }
    };

    match replay_ndjson(&ndjson, &route, config) {
        Ok(events) => string_to_cstr(&vec_to_json_array(events)),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateful Tracker API
// ============================================================================

/// Opaque handle to a PageTracker
pub struct EngageTrackerHandle {
    tracker: PageTracker,
    outbox: MemorySink,
}

/// Activate a tracker for `route` at `start_ms`.
///
/// # Safety
/// - `route` must be a valid null-terminated C string.
/// - `config_json` may be NULL for the default configuration.
/// - Must be freed with `engage_tracker_free`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn engage_tracker_new(
    route: *const c_char,
    config_json: *const c_char,
    start_ms: i64,
) -> *mut EngageTrackerHandle {
    clear_last_error();

    let Some(route) = cstr_to_string(route) else {
        set_last_error("Invalid route string pointer");
        return ptr::null_mut();
    };
    let config = match config_from_ptr(config_json) {
        Ok(config) => config,
        Err(e) => {
            set_last_error(&e);
            return ptr::null_mut();
        }
    };
    let Some(start) = millis_to_datetime(start_ms) else {
        set_last_error("Start time out of range");
        return ptr::null_mut();
    };

    let outbox = MemorySink::new("ffi");
    let tracker = PageTracker::builder(route)
        .config(config)
        .sink(Box::new(outbox.clone()))
        .activate(start);

    Box::into_raw(Box::new(EngageTrackerHandle { tracker, outbox }))
}

/// Free a tracker. An active tracker is deactivated first.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `engage_tracker_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn engage_tracker_free(tracker: *mut EngageTrackerHandle) {
    if !tracker.is_null() {
        drop(Box::from_raw(tracker));
    }
}

/// Feed one engage.signal.v1 JSON record.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `engage_tracker_new`.
/// - `signal_json` must be a valid null-terminated C string.
/// - Returns the number of events dispatched, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn engage_tracker_handle_signal(
    tracker: *mut EngageTrackerHandle,
    signal_json: *const c_char,
) -> i32 {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return -1;
    }
    let handle = &mut *tracker;

    let Some(json) = cstr_to_string(signal_json) else {
        set_last_error("Invalid signal string pointer");
        return -1;
    };
    let signal: Signal = match serde_json::from_str(&json) {
        Ok(signal) => signal,
        Err(e) => {
            set_last_error(&format!("Failed to parse signal: {}", e));
            return -1;
        }
    };
    if let Err(e) = signal.validate() {
        set_last_error(&e.to_string());
        return -1;
    }

    handle.tracker.handle(&signal).min(i32::MAX as u64) as i32
}

/// Advance the tracker clock, running due timers.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `engage_tracker_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn engage_tracker_advance(
    tracker: *mut EngageTrackerHandle,
    now_ms: i64,
) -> i32 {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return -1;
    }
    let handle = &mut *tracker;

    match millis_to_datetime(now_ms) {
        Some(now) => {
            handle.tracker.advance_to(now);
            0
        }
        None => {
            set_last_error("Time out of range");
            -1
        }
    }
}

/// Take every event dispatched since the last drain, as a JSON array.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `engage_tracker_new`.
/// - Returns a newly allocated string that must be freed with `engage_free_string`.
/// - Returns NULL on error; call `engage_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn engage_tracker_drain_events(
    tracker: *mut EngageTrackerHandle,
) -> *mut c_char {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return ptr::null_mut();
    }
    let handle = &*tracker;

    match events_to_json(&handle.outbox.drain()) {
        Ok(events) => string_to_cstr(&vec_to_json_array(events)),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Serialize the bounded event log.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `engage_tracker_new`.
/// - Returns a newly allocated string that must be freed with `engage_free_string`.
/// - Returns NULL on error; call `engage_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn engage_tracker_event_log(tracker: *mut EngageTrackerHandle) -> *mut c_char {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return ptr::null_mut();
    }
    let handle = &*tracker;

    match handle.tracker.event_log().to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Current exit-intent state (`idle`, `armed`, `triggered`, `dismissed`, `converted`).
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `engage_tracker_new`.
/// - Returns a pointer to a static string. Do NOT free.
/// - Returns NULL if `tracker` is NULL.
#[no_mangle]
pub unsafe extern "C" fn engage_tracker_exit_intent_state(
    tracker: *mut EngageTrackerHandle,
) -> *const c_char {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return ptr::null();
    }
    let handle = &*tracker;

    let state: &'static [u8] = match handle.tracker.exit_intent_state() {
        ExitIntentState::Idle => &b"idle\0"[..],
        ExitIntentState::Armed => &b"armed\0"[..],
        ExitIntentState::Triggered => &b"triggered\0"[..],
        ExitIntentState::Dismissed => &b"dismissed\0"[..],
        ExitIntentState::Converted => &b"converted\0"[..],
    };
    state.as_ptr() as *const c_char
}

/// Deactivate the tracker, dispatching the terminal page_exit.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `engage_tracker_new`.
/// - Returns 1 if the tracker was deactivated, 0 if it was already inactive,
///   -1 on error.
#[no_mangle]
pub unsafe extern "C" fn engage_tracker_deactivate(
    tracker: *mut EngageTrackerHandle,
    now_ms: i64,
) -> i32 {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return -1;
    }
    let handle = &mut *tracker;

    let Some(now) = millis_to_datetime(now_ms) else {
        set_last_error("Time out of range");
        return -1;
    };
    match handle.tracker.deactivate(now) {
        Some(_) => 1,
        None => 0,
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Engage functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an Engage function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn engage_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Engage function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn engage_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Engage library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn engage_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    // 2024-01-15T14:00:00Z
    const START_MS: i64 = 1_705_327_200_000;

    fn read_and_free(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        unsafe {
            let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
            engage_free_string(ptr);
            s
        }
    }

    #[test]
    fn test_ffi_tracker_lifecycle() {
        let route = CString::new("/pricing").unwrap();
        let scroll = CString::new(
            r#"{"timestamp":"2024-01-15T14:00:02Z","signal":"scroll","percent":60.0}"#,
        )
        .unwrap();

        unsafe {
            let tracker = engage_tracker_new(route.as_ptr(), ptr::null(), START_MS);
            assert!(!tracker.is_null());

            assert_eq!(engage_tracker_handle_signal(tracker, scroll.as_ptr()), 0);
            assert_eq!(engage_tracker_advance(tracker, START_MS + 3_000), 0);

            let events: serde_json::Value =
                serde_json::from_str(&read_and_free(engage_tracker_drain_events(tracker))).unwrap();
            let types: Vec<&str> = events
                .as_array()
                .unwrap()
                .iter()
                .map(|e| e["event_type"].as_str().unwrap())
                .collect();
            assert_eq!(types, vec!["page_view", "scroll_depth", "scroll_depth"]);

            let state = CStr::from_ptr(engage_tracker_exit_intent_state(tracker));
            assert_eq!(state.to_str().unwrap(), "armed");

            assert_eq!(engage_tracker_deactivate(tracker, START_MS + 4_000), 1);
            assert_eq!(engage_tracker_deactivate(tracker, START_MS + 5_000), 0);

            let log: serde_json::Value =
                serde_json::from_str(&read_and_free(engage_tracker_event_log(tracker))).unwrap();
            assert_eq!(log["entries"].as_array().unwrap().len(), 4);

            engage_tracker_free(tracker);
        }
    }

    #[test]
    fn test_ffi_replay() {
        let ndjson = CString::new(
            "{\"timestamp\":\"2024-01-15T14:00:00Z\",\"signal\":\"tick\"}\n\
             {\"timestamp\":\"2024-01-15T14:00:05Z\",\"signal\":\"click\",\"target\":{\"href\":\"tel:+15550100\"}}",
        )
        .unwrap();
        let route = CString::new("/").unwrap();
        let config = CString::new(r#"{"scrollDepths": [50]}"#).unwrap();

        unsafe {
            let result = engage_replay_ndjson(ndjson.as_ptr(), route.as_ptr(), config.as_ptr());
            let json = read_and_free(result);
            assert!(json.starts_with('['));
            assert!(json.contains("contact_click"));
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let route = CString::new("/").unwrap();
        let bad_signal = CString::new("not json").unwrap();

        unsafe {
            let tracker = engage_tracker_new(route.as_ptr(), ptr::null(), START_MS);
            assert_eq!(engage_tracker_handle_signal(tracker, bad_signal.as_ptr()), -1);

            let error = engage_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.contains("Failed to parse signal"));

            assert_eq!(engage_tracker_handle_signal(ptr::null_mut(), bad_signal.as_ptr()), -1);
            engage_tracker_free(tracker);
        }
    }

    #[test]
    fn test_ffi_state_clears_stale_error() {
        let route = CString::new("/").unwrap();
        let bad_signal = CString::new("not json").unwrap();

        unsafe {
            let tracker = engage_tracker_new(route.as_ptr(), ptr::null(), START_MS);
            assert_eq!(engage_tracker_handle_signal(tracker, bad_signal.as_ptr()), -1);
            assert!(!engage_last_error().is_null());

            let state = engage_tracker_exit_intent_state(tracker);
            assert_eq!(CStr::from_ptr(state).to_str().unwrap(), "armed");
            assert!(engage_last_error().is_null());

            engage_tracker_free(tracker);
        }
    }

    #[test]
    fn test_ffi_out_of_range_config_falls_back() {
        let route = CString::new("/").unwrap();
        let config = CString::new(
            r#"{"exitIntentDelayMs": 9223372036854775807, "topEdgeGraceMs": 18446744073709551615, "logCapacity": 18446744073709551615}"#,
        )
        .unwrap();

        unsafe {
            let tracker = engage_tracker_new(route.as_ptr(), config.as_ptr(), START_MS);
            assert!(!tracker.is_null());

            assert_eq!(engage_tracker_advance(tracker, START_MS + 1), 0);
            let state = CStr::from_ptr(engage_tracker_exit_intent_state(tracker));
            assert_eq!(state.to_str().unwrap(), "armed");

            assert_eq!(engage_tracker_advance(tracker, START_MS + 45_000), 0);
            let state = CStr::from_ptr(engage_tracker_exit_intent_state(tracker));
            assert_eq!(state.to_str().unwrap(), "triggered");

            engage_tracker_free(tracker);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = engage_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
