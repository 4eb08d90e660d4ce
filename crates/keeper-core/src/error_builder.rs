use crate::problemdetails;
use axum::http::StatusCode;
use serde::Serialize;
use std::collections::HashMap;

pub struct ErrorBuilder {
    status: StatusCode,
    type_: String,
    title: String,
    detail: String,
    values: HashMap<String, serde_json::Value>,
}

impl ErrorBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            type_: String::new(),
            title: String::new(),
            detail: String::new(),
            values: HashMap::new(),
        }
    }

    pub fn type_(mut self, type_: impl Into<String>) -> Self {
        self.type_ = type_.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn value<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.values.insert(key.to_string(), value);
        }
        self
    }

    pub fn build(self) -> problemdetails::Problem {
        let mut problem = problemdetails::new(self.status)
            .with_type(self.type_)
            .with_title(self.title)
            .with_detail(self.detail)
            .with_value("timestamp", chrono::Utc::now().to_rfc3339());

        for (key, value) in self.values {
            problem = problem.with_value(&key, value);
        }

        problem
    }
}

/// Request carried no credentials.
pub fn unauthorized() -> ErrorBuilder {
    ErrorBuilder::new(StatusCode::UNAUTHORIZED)
        .type_("https://keeper.dev/probs/unauthorized")
        .title("Unauthorized")
        .detail("A bearer token is required to access this resource")
        .value("error_code", "UNAUTHORIZED")
}

pub fn forbidden() -> ErrorBuilder {
    ErrorBuilder::new(StatusCode::FORBIDDEN)
        .type_("https://keeper.dev/probs/forbidden")
        .title("Forbidden")
        .detail("The bearer token is not valid")
        .value("error_code", "FORBIDDEN")
}

pub fn too_many_requests() -> ErrorBuilder {
    ErrorBuilder::new(StatusCode::TOO_MANY_REQUESTS)
        .type_("https://keeper.dev/probs/too-many-requests")
        .title("Too Many Requests")
        .detail("Request rate limit exceeded")
        .value("error_code", "TOO_MANY_REQUESTS")
}

/// Upstream cluster unreachable or rejected the request.
pub fn bad_gateway() -> ErrorBuilder {
    ErrorBuilder::new(StatusCode::BAD_GATEWAY)
        .type_("https://keeper.dev/probs/bad-gateway")
        .title("Source Cluster Unavailable")
        .value("error_code", "BAD_GATEWAY")
}
