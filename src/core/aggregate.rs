//! Purpose: Fold the accepted response lines of one request into a single outcome.
//! Exports: `AggregateResult`, `aggregate`.
//! Role: Pure reducer behind the caller bridge; also builds terminal failure results.
//! Invariants: `data` is a sequence iff the effective `isUnique` is false.
//! Invariants: The effective `isUnique` comes from the first accepted line when it carries one.
//! Invariants: `request_status` is unset only when no output arrived and none was required.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::core::wire::ResponseLine;

pub(crate) const NO_OUTPUT_WARNING: &str = "Warning: the output setting is set to optional, and the targeted program didn't give any output.";
pub(crate) const NO_OUTPUT_ERROR: &str = "Error: the targeted program didn't give any output; its responder might not be used or not correctly.";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub request_status: Option<bool>,
    pub data: Value,
    #[serde(rename = "optionalOutput")]
    pub optional_output: bool,
    #[serde(rename = "isUnique")]
    pub is_unique: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl AggregateResult {
    pub(crate) fn empty(is_unique: bool, optional_output: bool) -> Self {
        Self {
            request_status: None,
            data: Value::Null,
            optional_output,
            is_unique,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Failed outcome with one error and an optional warning.
    pub(crate) fn failure(
        is_unique: bool,
        optional_output: bool,
        error: impl Into<String>,
        warning: Option<&str>,
    ) -> Self {
        let mut result = Self::empty(is_unique, optional_output);
        result.request_status = Some(false);
        result.errors.push(error.into());
        result.warnings.extend(warning.map(str::to_string));
        result
    }

    pub fn is_success(&self) -> bool {
        self.request_status == Some(true)
    }

    pub fn is_failure(&self) -> bool {
        self.request_status == Some(false)
    }

    /// The payload, but only for a successful call.
    pub fn data(&self) -> Option<&Value> {
        self.is_success().then_some(&self.data)
    }

    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let data = self.data().ok_or_else(|| {
            Error::new(ErrorKind::ProtocolViolation)
                .with_message("call did not succeed; no data available")
        })?;
        T::deserialize(data).map_err(|err| {
            Error::new(ErrorKind::MalformedResponse)
                .with_message(format!("response data has an unexpected shape: {err}"))
                .with_source(err)
        })
    }
}

pub fn aggregate(
    accepted: Vec<ResponseLine>,
    is_unique: bool,
    optional_output: bool,
) -> AggregateResult {
    let mut result = AggregateResult::empty(is_unique, optional_output);

    let Some(first) = accepted.first() else {
        if optional_output {
            result.warnings.push(NO_OUTPUT_WARNING.to_string());
        } else {
            result.request_status = Some(false);
            result.errors.push(NO_OUTPUT_ERROR.to_string());
        }
        return result;
    };

    // The callee knows how many outputs it produces; its flag wins.
    result.is_unique = first.is_unique.unwrap_or(is_unique);
    let all_ok = accepted.iter().all(|line| line.request_status);
    result.request_status = Some(all_ok);

    let count = accepted.len();
    let mut data = Vec::with_capacity(count);
    for line in accepted {
        result.errors.extend(line.errors);
        data.push(line.data);
    }

    if !result.is_unique {
        result.data = Value::Array(data);
    } else if count == 1 {
        result.data = data.pop().unwrap_or(Value::Null);
    } else {
        result.request_status = Some(false);
        result.errors.push(format!(
            "Error: Expected 1 output (isUnique=True) but received {count}."
        ));
    }
    result
}
