use std::collections::BTreeMap;

use serde::Serialize;

use super::EmbeddedHost;

/// Values handed to the booking wizard's user-data store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefillSeed {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub postcode: Option<String>,
    pub phone_number: Option<String>,
    pub email_address: Option<String>,
    pub submission_id: Option<String>,
}

/// Receives prefill values inside the embedded app.
pub trait PrefillSink {
    fn apply_prefill(&mut self, seed: PrefillSeed);
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl PrefillSeed {
    /// Maps the answer keys captured by the parent.
    pub fn from_answers(answers: &BTreeMap<String, String>) -> Self {
        Self {
            first_name: non_empty(answers.get("first_name")),
            last_name: non_empty(answers.get("last_name")),
            postcode: non_empty(answers.get("primary_address_postalcode")),
            phone_number: non_empty(answers.get("phone_number")),
            email_address: non_empty(answers.get("email_address")),
            submission_id: non_empty(answers.get("submissionId")),
        }
    }

    /// `prefill_postcode` and `prefill_first_name` from the iframe URL.
    pub fn from_query<E: EmbeddedHost + ?Sized>(host: &E) -> Self {
        Self {
            first_name: non_empty(host.query_param("prefill_first_name").as_ref()),
            postcode: non_empty(host.query_param("prefill_postcode").as_ref()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
