//! FFI bindings for Labwatch
//!
//! C-compatible functions for calling the engine from the host application.
//! All functions take null-terminated C strings and return allocated memory that
//! must be freed by the caller using `labwatch_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::lookup::NoLookup;
use crate::pipeline::{lab_results_to_alerts, load_lookup};
use crate::snapshot::SnapshotAdapter;
use crate::store::{AlertAvailability, AlertStore};

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

// ============================================================================
// Stateless API
// ============================================================================

/// Derive an alert report from a lab-result snapshot.
///
/// # Safety
/// - `snapshot_json` must be a valid null-terminated C string.
/// - `dictionary_json` must be a valid null-terminated C string, or NULL for no dictionary.
/// - Returns a newly allocated string that must be freed with `labwatch_free_string`.
/// - Returns NULL on error; call `labwatch_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn labwatch_alerts_from_json(
    snapshot_json: *const c_char,
    dictionary_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let snapshot = match cstr_to_string(snapshot_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid snapshot string pointer");
            return ptr::null_mut();
        }
    };
    let dictionary = cstr_to_string(dictionary_json);

    match lab_results_to_alerts(&snapshot, dictionary.as_deref()) {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Alert Store API
// ============================================================================

/// Opaque handle to an AlertStore
pub struct AlertStoreHandle {
    store: AlertStore,
}

/// Create a new alert store.
///
/// # Safety
/// - `dictionary_json` must be a valid null-terminated C string, or NULL for no dictionary.
/// - Must be freed with `labwatch_store_free`.
/// - Returns NULL on error; call `labwatch_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn labwatch_store_new(
    dictionary_json: *const c_char,
) -> *mut AlertStoreHandle {
    clear_last_error();

    let lookup = match cstr_to_string(dictionary_json) {
        Some(json) => match load_lookup(Some(json.as_str())) {
            Ok(lookup) => lookup,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        },
        None => Box::new(NoLookup),
    };

    let handle = Box::new(AlertStoreHandle {
        store: AlertStore::new(lookup),
    });
    Box::into_raw(handle)
}

/// Free an alert store.
///
/// # Safety
/// - `store` must be a valid pointer returned by `labwatch_store_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn labwatch_store_free(store: *mut AlertStoreHandle) {
    if !store.is_null() {
        drop(Box::from_raw(store));
    }
}

/// Replace the store's lab-result snapshot.
///
/// # Safety
/// - `store` must be a valid pointer returned by `labwatch_store_new`.
/// - `snapshot_json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `labwatch_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn labwatch_store_load(
    store: *mut AlertStoreHandle,
    snapshot_json: *const c_char,
) -> i32 {
    clear_last_error();

    if store.is_null() {
        set_last_error("Null store pointer");
        return -1;
    }

    let handle = &mut *store;

    let snapshot = match cstr_to_string(snapshot_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid snapshot string pointer");
            return -1;
        }
    };

    match SnapshotAdapter::parse(&snapshot) {
        Ok(lab_results) => {
            handle.store.load_snapshot(lab_results);
            0
        }
        Err(e) => {
            handle.store.set_load_error(e.to_string());
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Run a session mutation that takes an alert id
unsafe fn with_alert_id(
    store: *mut AlertStoreHandle,
    alert_id: *const c_char,
    apply: impl FnOnce(&mut AlertStore, &str),
) -> i32 {
    clear_last_error();

    if store.is_null() {
        set_last_error("Null store pointer");
        return -1;
    }

    let handle = &mut *store;

    match cstr_to_string(alert_id) {
        Some(id) => {
            apply(&mut handle.store, &id);
            0
        }
        None => {
            set_last_error("Invalid alert id string pointer");
            -1
        }
    }
}

/// Dismiss an alert for the rest of the session.
///
/// # Safety
/// - `store` must be a valid pointer returned by `labwatch_store_new`.
/// - `alert_id` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn labwatch_store_dismiss(
    store: *mut AlertStoreHandle,
    alert_id: *const c_char,
) -> i32 {
    with_alert_id(store, alert_id, |store, id| store.dismiss_alert(id))
}

/// Acknowledge an alert.
///
/// # Safety
/// - `store` must be a valid pointer returned by `labwatch_store_new`.
/// - `alert_id` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn labwatch_store_acknowledge(
    store: *mut AlertStoreHandle,
    alert_id: *const c_char,
) -> i32 {
    with_alert_id(store, alert_id, |store, id| store.acknowledge_alert(id))
}

/// Restore all dismissed alerts.
///
/// # Safety
/// - `store` must be a valid pointer returned by `labwatch_store_new`.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn labwatch_store_clear_dismissed(store: *mut AlertStoreHandle) -> i32 {
    clear_last_error();

    if store.is_null() {
        set_last_error("Null store pointer");
        return -1;
    }

    let handle = &mut *store;
    handle.store.clear_dismissed();
    0
}

/// Current alert report of the store as JSON.
///
/// # Safety
/// - `store` must be a valid pointer returned by `labwatch_store_new`.
/// - Returns a newly allocated string that must be freed with `labwatch_free_string`.
/// - Returns NULL on error, including when the last load failed; call
///   `labwatch_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn labwatch_store_alerts_json(store: *mut AlertStoreHandle) -> *mut c_char {
    clear_last_error();

    if store.is_null() {
        set_last_error("Null store pointer");
        return ptr::null_mut();
    }

    let handle = &*store;

    if let AlertAvailability::Unavailable { reason } = handle.store.availability() {
        set_last_error(&format!("Alerts unavailable: {}", reason));
        return ptr::null_mut();
    }

    match serde_json::to_string(&handle.store.report()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Labwatch functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Labwatch function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn labwatch_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Labwatch function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn labwatch_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Labwatch library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn labwatch_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::alert_id;
    use crate::types::{AlertReport, AlertType};
    use std::ffi::CString;

    fn sample_snapshot() -> CString {
        CString::new(
            r#"[
                {"id": "lab-1", "date": "2024-01-15", "lab_name": "Quest", "test_values": [
                    {"biomarker_id": 1, "value": 200, "unit": "mg/dL",
                     "reference_range_low": 70, "reference_range_high": 100, "raw_text": "GLU"},
                    {"biomarker_id": 2, "value": 1.9, "unit": "mg/dL",
                     "reference_range_low": 0.6, "reference_range_high": 1.2,
                     "raw_text": "Creatinine"}
                ]}
            ]"#,
        )
        .unwrap()
    }

    unsafe fn take_report(ptr: *mut c_char) -> AlertReport {
        assert!(!ptr.is_null());
        let json = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        labwatch_free_string(ptr);
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_ffi_alerts_from_json() {
        let snapshot = sample_snapshot();
        let dictionary =
            CString::new(r#"[{"name": "Glucose", "category": "Metabolic", "aliases": ["GLU"]}]"#)
                .unwrap();

        unsafe {
            let report = take_report(labwatch_alerts_from_json(
                snapshot.as_ptr(),
                dictionary.as_ptr(),
            ));
            assert_eq!(report.alerts.len(), 2);
            assert!(report.alerts.iter().any(|a| a.biomarker_name == "Glucose"));

            let report = take_report(labwatch_alerts_from_json(snapshot.as_ptr(), ptr::null()));
            assert!(report.alerts.iter().any(|a| a.biomarker_name == "GLU"));
        }
    }

    #[test]
    fn test_ffi_store_lifecycle() {
        let snapshot = sample_snapshot();
        let glucose = CString::new(alert_id(AlertType::OutOfRange, 1, "lab-1")).unwrap();
        let creatinine = CString::new(alert_id(AlertType::OutOfRange, 2, "lab-1")).unwrap();

        unsafe {
            let store = labwatch_store_new(ptr::null());
            assert!(!store.is_null());
            assert_eq!(labwatch_store_load(store, snapshot.as_ptr()), 0);

            assert_eq!(labwatch_store_dismiss(store, glucose.as_ptr()), 0);
            assert_eq!(labwatch_store_acknowledge(store, creatinine.as_ptr()), 0);
            let report = take_report(labwatch_store_alerts_json(store));
            assert_eq!(report.alerts.len(), 1);
            assert!(report.alerts[0].acknowledged);
            assert_eq!(report.unacknowledged_count, 0);

            assert_eq!(labwatch_store_clear_dismissed(store), 0);
            let report = take_report(labwatch_store_alerts_json(store));
            assert_eq!(report.alerts.len(), 2);

            labwatch_store_free(store);
        }
    }

    #[test]
    fn test_ffi_failed_load_marks_unavailable() {
        let invalid = CString::new("not json").unwrap();

        unsafe {
            let store = labwatch_store_new(ptr::null());
            assert_eq!(labwatch_store_load(store, invalid.as_ptr()), -1);

            let result = labwatch_store_alerts_json(store);
            assert!(result.is_null());
            let error = CStr::from_ptr(labwatch_last_error()).to_str().unwrap();
            assert!(error.starts_with("Alerts unavailable"));

            labwatch_store_free(store);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid_json = CString::new("[{").unwrap();
            let result = labwatch_alerts_from_json(invalid_json.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error = labwatch_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            assert_eq!(labwatch_store_dismiss(ptr::null_mut(), invalid_json.as_ptr()), -1);
            assert!(labwatch_store_alerts_json(ptr::null_mut()).is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = labwatch_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
