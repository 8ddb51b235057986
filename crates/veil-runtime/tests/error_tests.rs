//! Integration tests for error handling in veil-runtime

use veil_runtime::{Artifact, Target, VeilError};

#[test]
fn test_serialization_error_message() {
    let error = VeilError::serialization("invalid JSON format");

    let error_msg = error.to_string();
    assert!(error_msg.contains("Serialization error"));
    assert!(error_msg.contains("invalid JSON format"));
}

#[test]
fn test_invalid_artifact_error_message() {
    let error = VeilError::invalid_artifact("duplicate entry `f()`");

    let error_msg = error.to_string();
    assert!(error_msg.contains("Invalid artifact"));
    assert!(error_msg.contains("f()"));
}

#[test]
fn test_other_error_message() {
    let error = VeilError::other("unexpected error occurred");
    assert_eq!(error.to_string(), "unexpected error occurred");
}

#[test]
fn test_unknown_target_lists_supported_targets() {
    let error = "riscv".parse::<Target>().unwrap_err();
    assert!(matches!(error, VeilError::UnknownTarget(ref name) if name == "riscv"));
    assert!(error.to_string().contains("`evm` or `wasm`"));
}

#[test]
fn test_serde_json_error_conversion() {
    let json_err = serde_json::from_str::<Target>("not json").unwrap_err();
    let error: VeilError = json_err.into();
    assert!(matches!(error, VeilError::Serialization(_)));
}

#[test]
fn test_malformed_artifact_json() {
    let result = Artifact::from_json("{\"target\": \"evm\"}");
    assert!(matches!(result, Err(VeilError::Serialization(_))));
}
