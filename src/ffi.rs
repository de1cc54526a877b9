//! FFI bindings for HawkEye
//!
//! This module provides C-compatible functions for running frustration detection
//! from other languages. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using `hawkeye_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::HawkeyeConfig;
use crate::detection::{detect_frustration_json, parse_session, FrustrationDetector};
use crate::error::HawkeyeError;

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

fn result_to_cstr(result: Result<String, HawkeyeError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Detect incidents in a completed session and return them as a JSON array.
///
/// # Safety
/// - `session_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `hawkeye_free_string`.
/// - Returns NULL on error; call `hawkeye_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn hawkeye_detect_frustration(session_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(json_str) = cstr_to_string(session_json) else {
        set_last_error("Invalid session JSON string pointer");
        return ptr::null_mut();
    };

    result_to_cstr(detect_frustration_json(&json_str))
}

// ============================================================================
// Configured detector API
// ============================================================================

/// Opaque handle to a configured detector
pub struct HawkeyeDetectorHandle {
    detector: FrustrationDetector,
}

/// Create a detector from a configuration JSON document.
///
/// # Safety
/// - `config_json` must be NULL (defaults) or a valid null-terminated C string.
/// - Returns NULL on invalid configuration; call `hawkeye_last_error` for details.
/// - The handle must be freed with `hawkeye_detector_free`.
#[no_mangle]
pub unsafe extern "C" fn hawkeye_detector_new(config_json: *const c_char) -> *mut HawkeyeDetectorHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        HawkeyeConfig::default()
    } else {
        let parsed = cstr_to_string(config_json)
            .ok_or_else(|| HawkeyeError::InvalidConfig("config is not valid UTF-8".to_string()))
            .and_then(|json| HawkeyeConfig::from_json(&json));
        match parsed {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    Box::into_raw(Box::new(HawkeyeDetectorHandle {
        detector: FrustrationDetector::new(config.detection),
    }))
}

/// Free a detector created with `hawkeye_detector_new`.
///
/// # Safety
/// - `detector` must be a pointer returned by `hawkeye_detector_new`, or NULL.
/// - The pointer must not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn hawkeye_detector_free(detector: *mut HawkeyeDetectorHandle) {
    if !detector.is_null() {
        drop(Box::from_raw(detector));
    }
}

/// Detect incidents with a configured detector.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `hawkeye_detector_new`.
/// - `session_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `hawkeye_free_string`.
#[no_mangle]
pub unsafe extern "C" fn hawkeye_detector_detect(
    detector: *const HawkeyeDetectorHandle,
    session_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if detector.is_null() {
        set_last_error("Null detector pointer");
        return ptr::null_mut();
    }
    let handle = &*detector;

    let Some(json_str) = cstr_to_string(session_json) else {
        set_last_error("Invalid session JSON string pointer");
        return ptr::null_mut();
    };

    let result = parse_session(&json_str).and_then(|session| {
        let incidents = handle.detector.detect(&session);
        Ok(serde_json::to_string(&incidents)?)
    });
    result_to_cstr(result)
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by any HawkEye function.
///
/// # Safety
/// - `ptr` must be a pointer returned by a HawkEye function, or NULL.
/// - The pointer must not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn hawkeye_free_string(ptr: *mut c_char) {
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
/// - Returns a pointer to a thread-local string; do not free it.
/// - The pointer is valid until the next HawkEye call on the same thread.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn hawkeye_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the HawkEye version string.
///
/// # Safety
/// - Returns a static string; do not free it.
#[no_mangle]
pub unsafe extern "C" fn hawkeye_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
