// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod facade;
pub mod headers;
pub mod http;

pub use facade::{SecureRequest, SecureResponse, SecureTransport, SigningStatus};
pub use http::{HttpError, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
