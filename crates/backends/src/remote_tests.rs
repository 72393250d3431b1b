// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    scp_form = {
        "git@github.com:kandev/kandev.git",
        Some("https://tok@github.com/kandev/kandev.git"),
    },
    ssh_scheme = {
        "ssh://git@github.com/kandev/kandev.git",
        Some("https://tok@github.com/kandev/kandev.git"),
    },
    https_untouched = { "https://github.com/kandev/kandev.git", None },
    plain_path = { "/srv/git/repo.git", None },
    missing_path = { "git@github.com:", None },
)]
fn ssh_url_rewrite(url: &str, expected: Option<&str>) {
    assert_eq!(rewrite_ssh_url(url, "tok").as_deref(), expected);
}

#[parameterized(
    timeout = { kandev_agentctl::ControlError::Timeout, true },
    server_error = { kandev_agentctl::ControlError::Http("HTTP 503: busy".into()), true },
    rate_limited = { kandev_agentctl::ControlError::Http("HTTP 429: slow down".into()), true },
    conn_reset = { kandev_agentctl::ControlError::Http("write failed: connection reset".into()), true },
    refused = { kandev_agentctl::ControlError::Http("connect failed: refused".into()), true },
    bad_request = { kandev_agentctl::ControlError::Http("HTTP 400: nope".into()), false },
)]
fn upload_error_classification(error: kandev_agentctl::ControlError, transient: bool) {
    assert_eq!(classify_upload_error(error).is_transient(), transient);
}

#[tokio::test]
async fn retry_gives_up_after_max_attempts() {
    let attempts = std::sync::atomic::AtomicUsize::new(0);
    let result: Result<(), BackendError> = with_transient_retry(4, || {
        attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async { Err(BackendError::Transient("still down".into())) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 4);
}

#[tokio::test]
async fn retry_stops_on_success() {
    let attempts = std::sync::atomic::AtomicUsize::new(0);
    let result = with_transient_retry(4, || {
        let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(BackendError::Transient("flaky".into()))
            } else {
                Ok(n)
            }
        }
    })
    .await;
    assert_eq!(result.unwrap(), 2);
}

#[tokio::test]
async fn permanent_error_does_not_retry() {
    let attempts = std::sync::atomic::AtomicUsize::new(0);
    let result: Result<(), BackendError> = with_transient_retry(4, || {
        attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async { Err(BackendError::CreateFailed("bad spec".into())) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn git_token_key_name() {
    assert_eq!(GIT_TOKEN_KEY, "GIT_ACCESS_TOKEN");
}
