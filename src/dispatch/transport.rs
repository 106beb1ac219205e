use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use crate::dispatch::provider::{DispatchError, Provider};

/// How a request authenticates against its backend.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Auth<'a> {
    None,
    Bearer(&'a str),
    Header(&'static str, &'a str),
}

#[derive(Debug)]
pub(crate) enum RequestFailure {
    Request(reqwest::Error),
    Api { status: StatusCode, body: String },
}

impl RequestFailure {
    pub(crate) fn into_dispatch_error(self, provider: Provider) -> DispatchError {
        match self {
            Self::Request(source) => DispatchError::Request { provider, source },
            Self::Api { status, body } => DispatchError::from_status(provider, status, body),
        }
    }
}

/// Posts `payload` once. A non-success status is returned as `RequestFailure::Api`
/// with the body kept for error reporting; nothing is retried.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    auth: Auth<'_>,
    payload: &T,
    timeout_secs: Option<u64>,
) -> Result<reqwest::Response, RequestFailure> {
    let mut request = client.post(url).json(payload);

    request = match auth {
        Auth::None => request,
        Auth::Bearer(token) => request.bearer_auth(token),
        Auth::Header(name, value) => request.header(name, value),
    };

    if let Some(timeout_secs) = timeout_secs {
        request = request.timeout(Duration::from_secs(timeout_secs));
    }

    let response = request.send().await.map_err(RequestFailure::Request)?;
    let status = response.status();
    debug!(url, %status, "dispatch response");

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(RequestFailure::Api { status, body })
}

#[cfg(test)]
mod tests {
    use super::RequestFailure;
    use crate::dispatch::provider::{DispatchError, Provider};
    use reqwest::StatusCode;

    #[test]
    fn api_failure_maps_to_dispatch_error() {
        let failure = RequestFailure::Api {
            status: StatusCode::FORBIDDEN,
            body: r#"{"error":"Forbidden"}"#.to_string(),
        };
        let err = failure.into_dispatch_error(Provider::HuggingFace);
        assert!(matches!(err, DispatchError::Remote { ref error, .. } if error == "Forbidden"));
    }
}
