// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use cradle_rs::{
    core::errors::Error,
    requests::retry::{DefaultRetrier, ProxyRetrier, Retrier},
};

#[test]
fn default_retrier_backs_off_exponentially() {
    let retrier = DefaultRetrier::new(100, 9);
    let http = Error::HttpRequestFailure("boom".into());
    assert_eq!(
        retrier.handle_error(0, &http).expect("retryable"),
        Duration::from_millis(100)
    );
    assert_eq!(
        retrier.handle_error(1, &http).expect("retryable"),
        Duration::from_millis(400)
    );
    assert_eq!(
        retrier.handle_error(2, &http).expect("retryable"),
        Duration::from_millis(1600)
    );
}

#[test]
fn default_retrier_only_retries_http_failures() {
    let retrier = DefaultRetrier::new(100, 9);
    let err = retrier
        .handle_error(0, &Error::Calculation("not http".into()))
        .expect_err("foreign errors rethrow");
    assert!(matches!(err, Error::Calculation(_)));

    assert!(
        retrier
            .handle_error(0, &Error::BadHttpStatusCode(503))
            .is_ok()
    );
}

#[test]
fn default_retrier_bounds_attempts() {
    let retrier = DefaultRetrier::new(100, 3);
    let http = Error::HttpRequestFailure("boom".into());
    assert!(retrier.handle_error(0, &http).is_ok());
    assert!(retrier.handle_error(1, &http).is_ok());
    assert!(retrier.handle_error(2, &http).is_err());
}

#[test]
fn proxy_retrier_honors_the_retryable_flag() {
    let retrier = ProxyRetrier;
    let transient = Error::Remote {
        message: "peer restarting".into(),
        retryable: true,
    };
    let fatal = Error::Remote {
        message: "bad request".into(),
        retryable: false,
    };
    assert_eq!(
        retrier.handle_error(0, &transient).expect("retryable"),
        Duration::from_millis(100)
    );
    assert!(retrier.handle_error(0, &fatal).is_err());
    assert!(
        retrier
            .handle_error(0, &Error::Calculation("other".into()))
            .is_err()
    );
}
