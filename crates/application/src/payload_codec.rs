use concord_core::{CoordinationError, CoordinationResult};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encodes a typed payload as JSON bytes.
pub fn encode_json<T: Serialize>(value: &T) -> CoordinationResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|error| {
        CoordinationError::Serialization(format!("failed to encode payload: {error}"))
    })
}

/// Decodes JSON bytes into a typed payload.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> CoordinationResult<T> {
    serde_json::from_slice(bytes).map_err(|error| {
        CoordinationError::Serialization(format!("failed to decode payload: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use concord_core::CoordinationError;
    use serde::{Deserialize, Serialize};

    use super::{decode_json, encode_json};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ReleaseTask {
        schedule_id: u32,
        batch_code: i64,
        batch_id: i32,
        run_time: Option<String>,
    }

    #[test]
    fn typed_payload_survives_encoding() {
        let task = ReleaseTask {
            schedule_id: 10,
            batch_code: 21_748_678_642,
            batch_id: 1,
            run_time: None,
        };

        let bytes = encode_json(&task).unwrap_or_default();
        let decoded = decode_json::<ReleaseTask>(bytes.as_slice());

        assert_eq!(decoded, Ok(task));
    }

    #[test]
    fn malformed_payload_is_a_serialization_error() {
        let decoded = decode_json::<ReleaseTask>(b"{\"schedule_id\":");

        assert!(matches!(decoded, Err(CoordinationError::Serialization(_))));
    }
}
