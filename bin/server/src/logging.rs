// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! Wires `tracing-subscriber` with an `EnvFilter` read from `RUST_LOG` and a
//! pretty-or-json formatter selected by configuration.

pub fn init(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match log_format {
        "json" => subscriber.json().init(),
        _ => subscriber.init(),
    }
}
