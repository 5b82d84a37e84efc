//! C FFI bindings for u-layer-eval.
//!
//! The host application passes JSON requests as null-terminated UTF-8
//! strings and receives either JSON documents or `#[repr(C)]` structs.
//!
//! Functions that fill a struct return a `LAYER_EVAL_*` status code;
//! functions that return JSON return null on failure. Either way the reason
//! is available from `layer_eval_last_error()` on the calling thread.
//! Returned JSON strings belong to the caller and go back through
//! `layer_eval_free_string`. A panic inside a request is caught and
//! reported as `LAYER_EVAL_ERR_PANIC` or a null string.
//!
//! # Requests
//!
//! Compare request:
//!
//! ```json
//! {
//!   "manual":    { "s1": 0, "s2": 0, "s3": 1 },
//!   "automatic": { "s1": 4, "s2": 4, "s3": 4 },
//!   "vectors":   { "s1": [0.0, 1.0], "s2": [0.1, 1.0], "s3": [3.0, 0.0] },
//!   "config":    { "report": { "probability_floor": 1e-12 } },
//!   "window_len": 2048,
//!   "target_k": 2
//! }
//! ```
//!
//! `vectors`, `config`, `window_len` and `target_k` are optional. When
//! `target_k` is present the automatic labels are calibrated first and the
//! session carries the calibration summary.
//!
//! Calibrate request: `automatic`, `vectors`, `target_k` and optional `config`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic;
use std::ptr;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::calibrate::{CalibrationOutcome, KCalibrator};
use crate::config::EngineConfig;
use crate::error::EvalError;
use crate::features::{LabelAssignment, Sample, SampleSet};
use crate::report::{ComparisonMetrics, ComparisonReportBuilder};
use crate::session::ComparisonSession;

// ── Status codes and last error ───────────────────────────────────────

/// Request handled; outputs are written.
pub const LAYER_EVAL_OK: i32 = 0;
/// The request string or the output struct pointer was null.
pub const LAYER_EVAL_ERR_NULL_PTR: i32 = -1;
/// The request decoded but its samples, labels or thresholds were rejected.
pub const LAYER_EVAL_ERR_INVALID_INPUT: i32 = -2;
/// The request was not valid JSON or did not match the request shape.
pub const LAYER_EVAL_ERR_PARSE_FAILED: i32 = -3;
/// A collaborator reported a failure.
pub const LAYER_EVAL_ERR_ANALYSIS_FAILED: i32 = -4;
/// The run observed its cancel flag.
pub const LAYER_EVAL_ERR_CANCELLED: i32 = -5;
pub const LAYER_EVAL_ERR_PANIC: i32 = -99;

thread_local! {
    // Message of the most recent failed request on this thread.
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    let message = CString::new(msg).ok();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

/// Describes why the last request on this thread failed, or null.
///
/// Requests that fail leave their message here; successful requests do not
/// clear it. The pointer stays valid until the next failing request or
/// `layer_eval_clear_error` on the same thread.
///
/// # Safety
/// The caller must not free the returned pointer.
#[no_mangle]
pub extern "C" fn layer_eval_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null(), |message| message.as_ptr())
    })
}

/// Forgets the last request failure on this thread.
#[no_mangle]
pub extern "C" fn layer_eval_clear_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Status code for a request rejected by the engine.
fn error_code(err: &EvalError) -> i32 {
    match err {
        EvalError::Json(_) => LAYER_EVAL_ERR_PARSE_FAILED,
        EvalError::Cancelled => LAYER_EVAL_ERR_CANCELLED,
        EvalError::Collaborator(_) => LAYER_EVAL_ERR_ANALYSIS_FAILED,
        EvalError::DimensionMismatch { .. }
        | EvalError::NonFiniteFeature { .. }
        | EvalError::DuplicateSample { .. }
        | EvalError::InvalidParameter { .. } => LAYER_EVAL_ERR_INVALID_INPUT,
    }
}

// ── Requests ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CompareRequest {
    manual: LabelAssignment,
    automatic: LabelAssignment,
    #[serde(default)]
    vectors: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    config: EngineConfig,
    #[serde(default)]
    window_len: Option<usize>,
    #[serde(default)]
    target_k: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CalibrateRequest {
    automatic: LabelAssignment,
    vectors: BTreeMap<String, Vec<f64>>,
    target_k: i64,
    #[serde(default)]
    config: EngineConfig,
}

/// Reads and parses a JSON request, recording the error on failure.
///
/// # Safety
/// `request` must be null or a valid null-terminated string.
unsafe fn read_request<T: DeserializeOwned>(request: *const c_char) -> Result<T, i32> {
    if request.is_null() {
        set_last_error("null request pointer");
        return Err(LAYER_EVAL_ERR_NULL_PTR);
    }
    let c_str = unsafe { CStr::from_ptr(request) };
    let json = c_str.to_str().map_err(|e| {
        set_last_error(&format!("invalid UTF-8: {e}"));
        LAYER_EVAL_ERR_INVALID_INPUT
    })?;
    serde_json::from_str(json).map_err(|e| {
        set_last_error(&format!("request parse error: {e}"));
        LAYER_EVAL_ERR_PARSE_FAILED
    })
}

fn sample_set(vectors: BTreeMap<String, Vec<f64>>) -> Result<SampleSet, EvalError> {
    SampleSet::new(vectors.into_iter().map(|(id, v)| Sample::new(id, v)).collect())
}

fn target_k(value: i64) -> Result<usize, EvalError> {
    usize::try_from(value)
        .ok()
        .filter(|&k| k > 0)
        .ok_or_else(|| EvalError::invalid("target_k", format!("must be positive, got {value}")))
}

fn run_compare(
    request: CompareRequest,
) -> Result<(ComparisonSession, ComparisonMetrics), EvalError> {
    request.config.validate()?;
    let samples = sample_set(request.vectors)?;

    let (automatic, calibration) = match request.target_k {
        Some(k) => {
            let outcome = KCalibrator::new()
                .with_config(request.config.calibration.clone())
                .calibrate_to_k(&request.automatic, &samples, target_k(k)?)?;
            let summary = outcome.summary();
            (outcome.labels, Some(summary))
        }
        None => (request.automatic, None),
    };

    let metrics = ComparisonReportBuilder::new()
        .with_config(request.config.report.clone())
        .build(&request.manual, &automatic, &samples)?;

    let mut session = ComparisonSession::new(request.manual, automatic, metrics.clone());
    if let Some(len) = request.window_len {
        session = session.with_window_len(len);
    }
    if let Some(summary) = calibration {
        session = session.with_calibration(summary);
    }
    Ok((session, metrics))
}

fn run_calibrate(request: CalibrateRequest) -> Result<CalibrationOutcome, EvalError> {
    request.config.validate()?;
    let samples = sample_set(request.vectors)?;
    KCalibrator::new()
        .with_config(request.config.calibration)
        .calibrate_to_k(&request.automatic, &samples, target_k(request.target_k)?)
}

fn into_c_string(json: String) -> *mut c_char {
    match CString::new(json) {
        Ok(s) => s.into_raw(),
        Err(e) => {
            set_last_error(&format!("output contains NUL byte: {e}"));
            ptr::null_mut()
        }
    }
}

// ── Compare ───────────────────────────────────────────────────────────

/// Runs a comparison and returns the session document as JSON.
///
/// Returns null on error; see `layer_eval_last_error`.
///
/// # Safety
/// - `request` must be a valid null-terminated UTF-8 string.
/// - The returned string must be freed with `layer_eval_free_string`.
#[no_mangle]
pub unsafe extern "C" fn layer_eval_compare_json(request: *const c_char) -> *mut c_char {
    let result = panic::catch_unwind(|| {
        let req: CompareRequest = match unsafe { read_request(request) } {
            Ok(r) => r,
            Err(_) => return ptr::null_mut(),
        };

        let session = match run_compare(req) {
            Ok((session, _)) => session,
            Err(e) => {
                set_last_error(&format!("compare error: {e}"));
                return ptr::null_mut();
            }
        };

        match session.to_json() {
            Ok(json) => into_c_string(json),
            Err(e) => {
                set_last_error(&format!("serialize error: {e}"));
                ptr::null_mut()
            }
        }
    });

    match result {
        Ok(p) => p,
        Err(_) => {
            set_last_error("panic in layer_eval_compare_json");
            ptr::null_mut()
        }
    }
}

/// C-compatible headline metrics of one comparison.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CHeadlineMetrics {
    /// Samples labeled in both assignments.
    pub scored_count: u64,
    /// Scored over union of labeled ids, in [0, 1].
    pub coverage: f64,
    pub ari: f64,
    pub nmi: f64,
    pub purity: f64,
    pub homogeneity: f64,
    pub completeness: f64,
    pub v_measure: f64,
    pub bcubed_precision: f64,
    pub bcubed_recall: f64,
    pub bcubed_f1: f64,
    /// Accuracy under the many-to-one majority mapping.
    pub mapped_accuracy: f64,
    /// Accuracy under the greedy one-to-one mapping.
    pub one_to_one_accuracy: f64,
    pub accuracy_gap: f64,
    pub silhouette_manual: f64,
    pub silhouette_automatic: f64,
    pub davies_bouldin_automatic: f64,
    pub calinski_harabasz_automatic: f64,
    pub manual_clusters: u32,
    pub automatic_clusters: u32,
    pub merge_count: u32,
    pub split_count: u32,
}

impl From<&ComparisonMetrics> for CHeadlineMetrics {
    fn from(m: &ComparisonMetrics) -> Self {
        Self {
            scored_count: m.scored_count as u64,
            coverage: m.coverage,
            ari: m.external.ari,
            nmi: m.external.nmi,
            purity: m.external.purity,
            homogeneity: m.external.homogeneity,
            completeness: m.external.completeness,
            v_measure: m.external.v_measure,
            bcubed_precision: m.external.b_cubed.precision,
            bcubed_recall: m.external.b_cubed.recall,
            bcubed_f1: m.external.b_cubed.f1,
            mapped_accuracy: m.alignment.mapped_accuracy,
            one_to_one_accuracy: m.alignment.one_to_one_accuracy,
            accuracy_gap: m.alignment.accuracy_gap,
            silhouette_manual: m.internal_manual.silhouette,
            silhouette_automatic: m.internal_automatic.silhouette,
            davies_bouldin_automatic: m.internal_automatic.davies_bouldin,
            calinski_harabasz_automatic: m.internal_automatic.calinski_harabasz,
            manual_clusters: m.manual_cluster_count as u32,
            automatic_clusters: m.automatic_cluster_count as u32,
            merge_count: m.merges().len() as u32,
            split_count: m.splits().len() as u32,
        }
    }
}

/// Runs a comparison and writes the headline metrics into `out`.
///
/// # Safety
/// - `request` must be a valid null-terminated UTF-8 string.
/// - `out` must point to a valid `CHeadlineMetrics`.
#[no_mangle]
pub unsafe extern "C" fn layer_eval_compare_headline(
    request: *const c_char,
    out: *mut CHeadlineMetrics,
) -> i32 {
    let result = panic::catch_unwind(|| {
        if out.is_null() {
            set_last_error("null out pointer");
            return LAYER_EVAL_ERR_NULL_PTR;
        }
        let req: CompareRequest = match unsafe { read_request(request) } {
            Ok(r) => r,
            Err(code) => return code,
        };

        match run_compare(req) {
            Ok((_, metrics)) => {
                unsafe {
                    (*out) = CHeadlineMetrics::from(&metrics);
                }
                LAYER_EVAL_OK
            }
            Err(e) => {
                set_last_error(&format!("compare error: {e}"));
                error_code(&e)
            }
        }
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error("panic in layer_eval_compare_headline");
            LAYER_EVAL_ERR_PANIC
        }
    }
}

// ── Calibrate ─────────────────────────────────────────────────────────

/// Calibrates automatic labels toward `target_k` and returns the outcome
/// as JSON.
///
/// Returns null on error; see `layer_eval_last_error`.
///
/// # Safety
/// - `request` must be a valid null-terminated UTF-8 string.
/// - The returned string must be freed with `layer_eval_free_string`.
#[no_mangle]
pub unsafe extern "C" fn layer_eval_calibrate_json(request: *const c_char) -> *mut c_char {
    let result = panic::catch_unwind(|| {
        let req: CalibrateRequest = match unsafe { read_request(request) } {
            Ok(r) => r,
            Err(_) => return ptr::null_mut(),
        };

        let outcome = match run_calibrate(req) {
            Ok(o) => o,
            Err(e) => {
                set_last_error(&format!("calibration error: {e}"));
                return ptr::null_mut();
            }
        };

        match serde_json::to_string(&outcome) {
            Ok(json) => into_c_string(json),
            Err(e) => {
                set_last_error(&format!("serialize error: {e}"));
                ptr::null_mut()
            }
        }
    });

    match result {
        Ok(p) => p,
        Err(_) => {
            set_last_error("panic in layer_eval_calibrate_json");
            ptr::null_mut()
        }
    }
}

/// Frees a string returned by a `layer_eval_*_json` function.
///
/// # Safety
/// `s` must have been returned by this library, or be null.
#[no_mangle]
pub unsafe extern "C" fn layer_eval_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

// ── Version ──────────────────────────────────────────────────────────

/// Returns the version string of u-layer-eval.
///
/// # Safety
/// The returned string is a static string literal. Do not free it.
#[no_mangle]
pub extern "C" fn layer_eval_version() -> *const c_char {
    c"0.1.0".as_ptr()
}
