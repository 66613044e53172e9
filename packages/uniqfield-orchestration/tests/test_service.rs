//! Callable endpoint: raw JSON requests in, responses or coded errors out.

use serde_json::json;
use std::sync::Arc;
use uniqfield_orchestration::request::{
    INVALID_CHANGE, INVALID_COLLECTION, INVALID_FIELD_NAME, MISSING_CHANGE,
};
use uniqfield_orchestration::{
    CallContext, ExtensionConfig, FieldUniquenessService, MutationRequest, UniquenessError,
    SUCCESS_MESSAGE,
};
use uniqfield_storage::{DocPath, DocumentStore, MemoryDocumentStore};

fn service(require_auth: bool, hash: bool) -> (Arc<MemoryDocumentStore>, FieldUniquenessService<MemoryDocumentStore>) {
    let store = Arc::new(MemoryDocumentStore::new());
    let config = ExtensionConfig {
        require_auth,
        hash_field: hash,
        ..ExtensionConfig::default()
    };
    let service = FieldUniquenessService::from_config(&config, Arc::clone(&store));
    (store, service)
}

fn request(value: serde_json::Value) -> MutationRequest {
    MutationRequest::from_json(&value.to_string()).unwrap()
}

async fn message_of(
    service: &FieldUniquenessService<MemoryDocumentStore>,
    req: serde_json::Value,
) -> (String, String) {
    let err = service
        .handle(&request(req), &CallContext::authenticated("uid"))
        .await
        .unwrap_err();
    (err.code().to_string(), err.to_string())
}

#[tokio::test]
async fn test_unauthenticated_caller_rejected() {
    let (store, service) = service(true, false);
    let err = service
        .handle(
            &request(json!({
                "change": "CREATE",
                "collection": "users",
                "fieldName": "username",
                "document": {"id": "1", "username": "johnDoe"}
            })),
            &CallContext::anonymous(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UniquenessError::Unauthenticated));
    assert_eq!(err.code(), "unauthenticated");
    assert_eq!(err.to_string(), "User must be authenticated.");
    assert_eq!(store.count("users"), 0);
}

#[tokio::test]
async fn test_validation_messages() {
    let (_, service) = service(false, false);

    let cases = [
        (json!({"collection": "users", "fieldName": "username"}), MISSING_CHANGE),
        (json!({"change": "CREATE", "collection": "", "fieldName": "username"}), INVALID_COLLECTION),
        (json!({"change": "CREATE", "collection": "users/1", "fieldName": "username"}), INVALID_COLLECTION),
        (json!({"change": "CREATE", "collection": "users", "fieldName": "a/b"}), INVALID_FIELD_NAME),
        (json!({"change": "UPSERT", "collection": "users", "fieldName": "username"}), INVALID_CHANGE),
    ];
    for (req, expected) in cases {
        let (code, message) = message_of(&service, req).await;
        assert_eq!(code, "invalid-argument");
        assert_eq!(message, expected);
    }
}

#[tokio::test]
async fn test_create_update_delete_round_trip() {
    let (store, service) = service(false, true);
    let ctx = CallContext::anonymous();

    let response = service
        .handle(
            &request(json!({
                "change": "CREATE",
                "collection": "users",
                "fieldName": "username",
                "document": {"id": "123", "username": "johnDoe", "age": 30}
            })),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(response.message, SUCCESS_MESSAGE);
    assert_eq!(store.count("users-username"), 1);

    service
        .handle(
            &request(json!({
                "change": "UPDATE",
                "collection": "users",
                "fieldName": "username",
                "document": {"id": "123", "username": "johnSmith"}
            })),
            &ctx,
        )
        .await
        .unwrap();
    let primary = store
        .get(&DocPath::new("users", "123").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        serde_json::Value::Object(primary),
        json!({"id": "123", "username": "johnSmith", "age": 30})
    );

    let (code, _) = message_of(
        &service,
        json!({
            "change": "CREATE",
            "collection": "users",
            "fieldName": "username",
            "document": {"id": "456", "username": "johnSmith"}
        }),
    )
    .await;
    assert_eq!(code, "already-exists");

    service
        .handle(
            &request(json!({
                "change": "DELETE",
                "collection": "users",
                "fieldName": "username",
                "document": {"id": "123", "username": "johnSmith"}
            })),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(store.count("users"), 0);
    assert_eq!(store.count("users-username"), 0);
}

#[tokio::test]
async fn test_storage_failure_is_internal() {
    let (store, service) = service(false, false);
    store.fail_writes_to("123");

    let (code, _) = message_of(
        &service,
        json!({
            "change": "CREATE",
            "collection": "users",
            "fieldName": "username",
            "document": {"id": "123", "username": "johnDoe"}
        }),
    )
    .await;
    assert_eq!(code, "internal");
    assert_eq!(store.count("users-username"), 0);
}
